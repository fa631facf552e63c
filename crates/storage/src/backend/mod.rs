//! Cache store traits and implementations.
//!
//! A [`CacheStore`] is a set of named caches; a [`Cache`] maps request URLs to
//! stored [`Response`]s. Both are deliberately small: open, lookup, put,
//! delete, enumerate. Anything smarter (eviction, revalidation, versioning)
//! lives in the engine on top.

mod local;
#[cfg(feature = "mock")]
mod memory;

pub use self::local::LocalStore;
#[cfg(feature = "mock")]
pub use self::memory::MemoryStore;
use crate::CacheHandle;
use crate::error::Result;
use crate::http::Response;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;

pub type KeyStream<'a> = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>>;

/// A collection of named caches.
///
/// # Examples
///
/// ```
/// use stowaway_storage::{Cache, CacheStore, Response, error::Result};
///
/// async fn remember(store: &dyn CacheStore) -> Result<bool> {
///     let cache = store.open("stowaway:example").await?;
///     cache.put("http://localhost/hello.txt", &Response::ok_with("hello")).await?;
///     store.has("stowaway:example").await
/// }
/// ```
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Name of the store, used for logging only.
    fn name(&self) -> &str;

    /// Open (creating if necessary) the cache called `name`.
    async fn open(&self, name: &str) -> Result<CacheHandle>;

    /// Whether a cache called `name` exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Delete the cache called `name` and everything in it.
    ///
    /// Returns `false` if there was no such cache. Handles opened before the
    /// delete may keep working, but the cache is no longer enumerated.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Names of every cache in the store.
    async fn keys(&self) -> Result<Vec<String>>;
}

/// One named cache of URL → response entries.
#[async_trait]
pub trait Cache: Send + Sync {
    fn name(&self) -> &str;

    /// The stored response for `url`, if any.
    async fn lookup(&self, url: &str) -> Result<Option<Response>>;

    /// Store `response` under `url`, replacing any existing entry.
    async fn put(&self, url: &str, response: &Response) -> Result<()>;

    /// Remove the entry for `url`. Returns `false` if there wasn't one.
    async fn delete(&self, url: &str) -> Result<bool>;

    /// Stream every URL stored in this cache.
    fn keys_stream(&self) -> KeyStream<'_>;

    /// Collect [`keys_stream()`](Self::keys_stream) into a [`Vec`].
    async fn keys(&self) -> Result<Vec<String>> {
        self.keys_stream().try_collect().await
    }
}
