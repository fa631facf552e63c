//! Local filesystem cache store.
//!
//! Each cache is a directory under the store root, named by the BLAKE3 hash
//! of the cache name (cache names contain `:` and arbitrary user text, which
//! doesn't belong in a path). The real name is kept in a `NAME` file inside.
//! Each entry is two files named by the BLAKE3 hash of its URL: `.body` with
//! the raw bytes and `.json` with everything else. The header is written
//! after the body, so an entry without a header doesn't exist.

use crate::backend::KeyStream;
use crate::error::{ErrorKind, Result};
use crate::http::{Headers, Response, ResponseKind};
use crate::name::validate as validate_name;
use crate::{Cache, CacheHandle, CacheStore};
use async_stream::stream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

const NAME_FILE: &str = "NAME";
const HEAD_EXTENSION: &str = "json";
const BODY_EXTENSION: &str = "body";

fn map_io_error(e: std::io::Error, what: &str) -> ErrorKind {
    match e.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::NotFound(what.to_string()),
        std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(what.to_string()),
        _ => ErrorKind::Io(e),
    }
}

fn hashed(value: &str) -> String {
    blake3::hash(value.as_bytes()).to_hex().to_string()
}

/// Create the cache directory and its `NAME` marker if either is missing.
/// A directory without the marker is invisible to enumeration.
async fn ensure_cache_dir(dir: &Path, name: &str) -> Result<()> {
    fs::create_dir_all(dir).await.map_err(|e| map_io_error(e, name))?;
    let marker = dir.join(NAME_FILE);
    if !fs::try_exists(&marker).await.map_err(ErrorKind::Io)? {
        fs::write(&marker, name).await.map_err(|e| map_io_error(e, name))?;
    }
    Ok(())
}

/// Filesystem-backed cache store.
///
/// # Examples
///
/// ```no_run
/// use stowaway_storage::backend::LocalStore;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = LocalStore::new("local", "/var/cache/stowaway")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalStore {
    name: String,
    root: PathBuf,
}
impl LocalStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists and isn't a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::BackendError(format!("store root `{}` is not absolute", root.display())));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::BackendError(format!("store root `{}` is not a directory", root.display())));
            }
        } else {
            // Use non-async here; it'll only happen once on startup and it's
            // not worth the hassle of making the constructor async.
            sync_create_dir(&root).map_err(|e| map_io_error(e, &root.display().to_string()))?;
        }
        Ok(Self { name: name.into(), root })
    }

    fn cache_dir(&self, name: &str) -> PathBuf {
        self.root.join(hashed(name))
    }

    async fn read_name(dir: &Path) -> Result<Option<String>> {
        match fs::read_to_string(dir.join(NAME_FILE)).await {
            Ok(name) => Ok(Some(name)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_io_error(e, &dir.display().to_string()).into()),
        }
    }
}

#[async_trait]
impl CacheStore for LocalStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, name: &str) -> Result<CacheHandle> {
        let name = validate_name(name)?;
        let dir = self.cache_dir(name);
        ensure_cache_dir(&dir, name).await?;
        Ok(Arc::new(LocalCache { name: name.to_string(), dir }))
    }

    async fn has(&self, name: &str) -> Result<bool> {
        let name = validate_name(name)?;
        Ok(fs::try_exists(self.cache_dir(name).join(NAME_FILE)).await.map_err(ErrorKind::Io)?)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let name = validate_name(name)?;
        match fs::remove_dir_all(self.cache_dir(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_io_error(e, name).into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await.map_err(|e| map_io_error(e, &self.name))?;
        while let Some(entry) = entries.next_entry().await.map_err(ErrorKind::Io)? {
            if !entry.file_type().await.map_err(ErrorKind::Io)?.is_dir() {
                continue;
            }
            // Directories without a NAME file are left over from an
            // interrupted delete; they aren't caches anymore.
            if let Some(name) = Self::read_name(&entry.path()).await? {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[derive(Serialize, Deserialize)]
struct EntryHead {
    url: String,
    status: u16,
    status_text: String,
    headers: Headers,
    response_url: Option<String>,
    redirected: bool,
    kind: ResponseKind,
    body_hash: String,
}

struct LocalCache {
    name: String,
    dir: PathBuf,
}
impl LocalCache {
    fn entry_paths(&self, url: &str) -> (PathBuf, PathBuf) {
        let stem = hashed(url);
        (
            self.dir.join(format!("{stem}.{HEAD_EXTENSION}")),
            self.dir.join(format!("{stem}.{BODY_EXTENSION}")),
        )
    }

    /// A header that can't be decoded is treated as absent: the only way to
    /// get one is a write racing a read.
    async fn read_head(&self, path: &Path) -> Result<Option<EntryHead>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(map_io_error(e, &self.name).into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(head) => Ok(Some(head)),
            Err(err) => {
                tracing::warn!(cache = %self.name, path = %path.display(), error = %err, "Ignoring unreadable cache entry header");
                Ok(None)
            },
        }
    }
}

#[async_trait]
impl Cache for LocalCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, url: &str) -> Result<Option<Response>> {
        let (head_path, body_path) = self.entry_paths(url);
        let Some(head) = self.read_head(&head_path).await? else {
            return Ok(None);
        };
        let body = match fs::read(&body_path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(cache = %self.name, url = %url, "Cache entry header has no body");
                return Ok(None);
            },
            Err(e) => return Err(map_io_error(e, url).into()),
        };
        if hashed_bytes(&body) != head.body_hash {
            tracing::warn!(cache = %self.name, url = %url, "Cache entry body does not match its header");
            return Ok(None);
        }
        Ok(Some(Response {
            status: head.status,
            status_text: head.status_text,
            headers: head.headers,
            body,
            url: head.response_url,
            redirected: head.redirected,
            kind: head.kind,
        }))
    }

    async fn put(&self, url: &str, response: &Response) -> Result<()> {
        let (head_path, body_path) = self.entry_paths(url);
        ensure_cache_dir(&self.dir, &self.name).await?;
        fs::write(&body_path, &response.body).await.map_err(|e| map_io_error(e, url))?;
        let head = EntryHead {
            url: url.to_string(),
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            response_url: response.url.clone(),
            redirected: response.redirected,
            kind: response.kind,
            body_hash: hashed_bytes(&response.body),
        };
        let encoded = serde_json::to_vec(&head).map_err(ErrorKind::Serialization)?;
        fs::write(&head_path, encoded).await.map_err(|e| map_io_error(e, url))?;
        tracing::trace!(cache = %self.name, url = %url, bytes = response.body.len(), "Stored cache entry");
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        let (head_path, body_path) = self.entry_paths(url);
        match fs::remove_file(&head_path).await {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(map_io_error(e, url).into()),
        }
        match fs::remove_file(&body_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(map_io_error(e, url).into()),
        }
    }

    fn keys_stream(&self) -> KeyStream<'_> {
        Box::pin(stream! {
            let mut entries = match fs::read_dir(&self.dir).await {
                Ok(entries) => entries,
                // Deleted cache, nothing to list.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
                Err(e) => {
                    yield Err(exn::Exn::from(map_io_error(e, &self.name)));
                    return;
                },
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => { yield Err(exn::Exn::from(ErrorKind::Io(e))); continue; },
                };
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != HEAD_EXTENSION) {
                    continue;
                }
                match self.read_head(&path).await {
                    Ok(Some(head)) => yield Ok(head.url),
                    Ok(None) => {},
                    Err(e) => yield Err(e),
                }
            }
        })
    }
}

fn hashed_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
