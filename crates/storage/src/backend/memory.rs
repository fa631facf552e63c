//! In-memory cache store for testing.

use crate::backend::KeyStream;
use crate::error::{ErrorKind, Result};
use crate::http::Response;
use crate::name::validate as validate_name;
use crate::{Cache, CacheHandle, CacheStore};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// In-memory cache store for testing.
///
/// Caches are kept in a `BTreeMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` and enumeration order is stable. Writes can be made
/// to fail on demand with [`fail_writes()`](Self::fail_writes), which is how
/// tests exercise the "cache write failed after a successful fetch" paths.
///
/// # Examples
///
/// ```
/// use stowaway_storage::backend::MemoryStore;
/// use stowaway_storage::{Cache, CacheStore, Response};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> stowaway_storage::error::Result<()> {
/// let store = MemoryStore::default();
/// let cache = store.open("assets").await?;
/// cache.put("http://localhost/app.js", &Response::ok_with("console.log(1)")).await?;
/// assert!(store.has("assets").await?);
///
/// store.fail_writes(true);
/// assert!(cache.put("http://localhost/other.js", &Response::ok_with("")).await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct MemoryStore {
    name: String,
    caches: RwLock<BTreeMap<String, Arc<MemoryCache>>>,
    fail_writes: Arc<AtomicBool>,
    puts: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Change the name of the memory store.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Make every subsequent `put` (in every cache, including handles that
    /// are already open) fail with a backend error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `put` calls across every cache.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}
impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            name: "memory".to_string(),
            caches: RwLock::new(BTreeMap::new()),
            fail_writes: Arc::new(AtomicBool::new(false)),
            puts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, name: &str) -> Result<CacheHandle> {
        let name = validate_name(name)?;
        let mut guard = self.caches.write().await;
        let cache = guard.entry(name.to_string()).or_insert_with(|| {
            Arc::new(MemoryCache {
                name: name.to_string(),
                entries: RwLock::new(BTreeMap::new()),
                fail_writes: Arc::clone(&self.fail_writes),
                puts: Arc::clone(&self.puts),
            })
        });
        Ok(Arc::clone(cache) as CacheHandle)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }
}

struct MemoryCache {
    name: String,
    entries: RwLock<BTreeMap<String, Response>>,
    fail_writes: Arc<AtomicBool>,
    puts: Arc<AtomicUsize>,
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, url: &str) -> Result<Option<Response>> {
        Ok(self.entries.read().await.get(url).cloned())
    }

    async fn put(&self, url: &str, response: &Response) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::BackendError(format!("write to `{}` rejected", self.name)));
        }
        self.entries.write().await.insert(url.to_string(), response.clone());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(url).is_some())
    }

    fn keys_stream(&self) -> KeyStream<'_> {
        Box::pin(stream! {
            // Snapshot under the read lock, then drop it before yielding to
            // avoid holding the lock across yield points.
            let keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
            for key in keys {
                yield Ok(key);
            }
        })
    }
}
