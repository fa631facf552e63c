//! Asset groups: the application's own, effectively immutable resources.
//!
//! Every asset URL listed in the manifest's hash table is pinned to exact
//! bytes: once a response with the right hash is cached it is served forever
//! without revalidation. Unhashed assets (matched by pattern) fall back to
//! ordinary HTTP freshness rules and are revalidated in the background.
//!
//! [`AssetCache`] holds everything both install modes share; the
//! [`AssetGroup`] implementations only differ in what
//! [`initialize_fully()`](AssetGroup::initialize_fully) does.

mod lazy;
mod prefetch;

pub use self::lazy::LazyAssetGroup;
pub use self::prefetch::PrefetchAssetGroup;
use crate::adapter::content_hash;
use crate::env::Env;
use crate::error::{ErrorKind, Result};
use crate::manifest::{AssetGroupConfig, InstallMode};
use crate::revalidate::needs_revalidation;
use async_trait::async_trait;
use exn::ResultExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use stowaway_asyncutils::Coalescer;
use stowaway_storage::{CacheHandle, Request, Response, Table};

/// How a previous version holds a given URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    NotCached,
    /// Cached during installation but never actually requested.
    CachedButUnused,
    Cached,
}

/// Bookkeeping for unhashed assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMetadata {
    /// When the response was fetched.
    pub ts: u64,
    /// Whether a client has requested it.
    pub used: bool,
}

/// A cached response together with its metadata, if it has any.
#[derive(Debug, Clone)]
pub struct CacheState {
    pub response: Response,
    pub metadata: Option<UrlMetadata>,
}

/// Read access to resources cached by earlier versions, so that installing a
/// new version doesn't download bytes that are already on disk.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// A cached response for `url`, but only if it was cached under `hash`.
    async fn lookup_resource_with_hash(&self, url: &str, hash: &str) -> Result<Option<Response>>;

    async fn lookup_resource_without_hash(&self, url: &str) -> Result<Option<CacheState>>;

    /// Every unhashed URL held in cache.
    async fn previously_cached_resources(&self) -> Result<Vec<String>>;

    async fn recent_cache_status(&self, url: &str) -> Result<CacheStatus>;
}

/// One asset group's cache, metadata and fetch machinery.
pub struct AssetCache {
    env: Env,
    config: AssetGroupConfig,
    /// Normalized.
    urls: Vec<String>,
    patterns: Vec<Regex>,
    /// Normalized URL → expected content hash, for the whole manifest.
    hashes: Arc<HashMap<String, String>>,
    cache: CacheHandle,
    metadata: Table,
    inflight: Coalescer<String, std::result::Result<Response, ErrorKind>>,
}
impl AssetCache {
    pub async fn open(env: Env, config: AssetGroupConfig, hashes: Arc<HashMap<String, String>>, manifest_hash: &str) -> Result<Self> {
        let urls = config.urls.iter().map(|url| env.urls.normalize(url)).collect();
        let patterns = config
            .patterns
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<std::result::Result<Vec<_>, _>>()
            .or_raise(|| ErrorKind::InvalidManifest)?;
        let base = format!("{}:assets:{}", manifest_hash, config.name);
        let cache = env.store.open(&env.cache_name(&format!("{base}:cache"))).await.or_raise(|| ErrorKind::Storage)?;
        let metadata = env.db.open(&format!("{base}:meta")).await.or_raise(|| ErrorKind::Storage)?;
        Ok(Self { env, config, urls, patterns, hashes, cache, metadata, inflight: Coalescer::new() })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AssetGroupConfig {
        &self.config
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn cache_names(&self) -> Vec<String> {
        vec![self.cache.name().to_string(), self.metadata.cache_name().to_string()]
    }

    /// Whether the (normalized) `url` belongs to this group.
    pub fn matches(&self, url: &str) -> bool {
        self.urls.iter().any(|known| known == url) || self.patterns.iter().any(|pattern| pattern.is_match(url))
    }

    pub fn expected_hash(&self, url: &str) -> Option<&str> {
        self.hashes.get(url).map(String::as_str)
    }

    /// `None` when the request isn't for this group.
    pub async fn handle_fetch(self: &Arc<Self>, request: &Request) -> Result<Option<Response>> {
        let url = self.env.urls.normalize(&request.url);
        if !request.method.is_cacheable() || !self.matches(&url) {
            return Ok(None);
        }
        if let Some(cached) = self.cache.lookup(&url).await.or_raise(|| ErrorKind::Storage)? {
            if self.hashes.contains_key(&url) {
                tracing::trace!(group = %self.config.name, url = %url, "Serving hash-pinned asset");
                return Ok(Some(cached));
            }
            let fetched_at = self.read_metadata(&url).await.map(|metadata| metadata.ts);
            if needs_revalidation(&cached.headers, fetched_at, self.env.now()) {
                tracing::debug!(group = %self.config.name, url = %url, "Stale asset, scheduling revalidation");
                let this = Arc::clone(self);
                let revalidate = Request::get(url.clone());
                self.env.idle.schedule(format!("revalidate({}): {}", self.cache.name(), url), async move {
                    this.fetch_and_cache_once(&revalidate, true).await.map(|_| ())
                });
            }
            return Ok(Some(cached));
        }
        let response = self.fetch_and_cache_once(&Request::get(url), true).await?;
        Ok(Some(response))
    }

    /// Fetch `request` and cache the result, sharing one network operation
    /// between concurrent callers for the same URL.
    ///
    /// The operation runs on its own task, so it completes (and populates the
    /// cache) even if every caller stops waiting.
    pub async fn fetch_and_cache_once(self: &Arc<Self>, request: &Request, used: bool) -> Result<Response> {
        let url = self.env.urls.normalize(&request.url);
        let this = Arc::clone(self);
        let request = request.clone();
        let outcome = self
            .inflight
            .run(url, move || async move {
                let task = tokio::spawn(async move { this.fetch_and_cache(&request, used).await.map_err(|err| (*err).clone()) });
                match task.await {
                    Ok(outcome) => outcome,
                    Err(err) => Err(ErrorKind::Critical(format!("asset fetch task failed: {err}"))),
                }
            })
            .await;
        outcome.map_err(exn::Exn::from)
    }

    async fn fetch_and_cache(&self, request: &Request, used: bool) -> Result<Response> {
        let url = self.env.urls.normalize(&request.url);
        let response = self.fetch_from_network(request).await?;
        if !response.ok() {
            tracing::debug!(group = %self.config.name, url = %url, status = response.status, "Not caching unsuccessful response");
            return Ok(response);
        }
        self.cache
            .put(&url, &response)
            .await
            .or_raise(|| ErrorKind::Critical(format!("failed to cache {url} (group {})", self.config.name)))?;
        if !self.hashes.contains_key(&url) {
            let metadata = UrlMetadata { ts: self.env.now(), used };
            self.metadata
                .write(&url, &metadata)
                .await
                .or_raise(|| ErrorKind::Critical(format!("failed to record metadata for {url} (group {})", self.config.name)))?;
        }
        Ok(response)
    }

    /// Fetch, following redirects up to the configured limit.
    async fn fetch_from_network(&self, request: &Request) -> Result<Response> {
        let limit = self.env.config.redirect_limit;
        let mut current = request.clone();
        let mut followed = 0;
        loop {
            let response = self.cache_busted_fetch(&current).await?;
            let Some(target) = response.url.as_deref().filter(|target| response.redirected && !target.is_empty()) else {
                return Ok(response);
            };
            if followed >= limit {
                exn::bail!(ErrorKind::Critical(format!("redirect limit exceeded fetching {}", request.url)));
            }
            followed += 1;
            tracing::debug!(from = %current.url, to = %target, "Following redirect");
            current = current.with_url(target);
        }
    }

    /// Fetch `request`, verifying the content hash of hash-pinned URLs.
    ///
    /// A response that fails verification (or doesn't arrive intact) is
    /// retried once with a cache-busting parameter, to get past intermediate
    /// caches holding old bytes.
    async fn cache_busted_fetch(&self, request: &Request) -> Result<Response> {
        let url = self.env.urls.normalize(&request.url);
        let network_request = request.with_url(self.env.urls.absolute(&request.url));
        let Some(expected) = self.hashes.get(&url) else {
            return Ok(self.env.safe_fetch(&network_request).await);
        };
        let response = self.env.safe_fetch(&network_request).await;
        if response.ok() && content_hash(&response.body) == *expected {
            return Ok(response);
        }
        tracing::debug!(group = %self.config.name, url = %url, status = response.status, "Hash-pinned fetch failed verification, busting caches");
        let busted = request.with_url(self.env.urls.cache_bust(&request.url, self.env.now()));
        let response = self.env.safe_fetch(&busted).await;
        if response.status == 404 {
            exn::bail!(ErrorKind::Unrecoverable(format!(
                "hashed resource {url} (group {}) is no longer available",
                self.config.name
            )));
        }
        if !response.ok() {
            return Ok(response);
        }
        let actual = content_hash(&response.body);
        if actual != *expected {
            exn::bail!(ErrorKind::Unrecoverable(format!(
                "hash mismatch for {url} (group {}): expected {expected}, got {actual}",
                self.config.name
            )));
        }
        Ok(response)
    }

    async fn read_metadata(&self, url: &str) -> Option<UrlMetadata> {
        self.metadata.read(url).await.ok()
    }

    pub async fn is_cached(&self, url: &str) -> Result<bool> {
        Ok(self.cache.lookup(url).await.or_raise(|| ErrorKind::Storage)?.is_some())
    }

    pub async fn cache_status(&self, url: &str) -> Result<CacheStatus> {
        if !self.is_cached(url).await? {
            return Ok(CacheStatus::NotCached);
        }
        Ok(match self.read_metadata(url).await {
            Some(UrlMetadata { used: false, .. }) => CacheStatus::CachedButUnused,
            _ => CacheStatus::Cached,
        })
    }

    /// The cached response for `url` if this version pins it to `hash`.
    pub async fn cached_with_hash(&self, url: &str, hash: &str) -> Result<Option<Response>> {
        if self.expected_hash(url) != Some(hash) {
            return Ok(None);
        }
        self.cache.lookup(url).await.or_raise(|| ErrorKind::Storage)
    }

    pub async fn fetch_from_cache_only(&self, url: &str) -> Result<Option<CacheState>> {
        let Some(response) = self.cache.lookup(url).await.or_raise(|| ErrorKind::Storage)? else {
            return Ok(None);
        };
        Ok(Some(CacheState { response, metadata: self.read_metadata(url).await }))
    }

    /// Cached URLs that aren't hash-pinned.
    pub async fn unhashed_resources(&self) -> Result<Vec<String>> {
        let keys = self.cache.keys().await.or_raise(|| ErrorKind::Storage)?;
        Ok(keys.into_iter().filter(|url| !self.hashes.contains_key(url)).collect())
    }

    /// Copy `url` from `source` if it holds the exact bytes this version pins.
    pub async fn maybe_update(&self, source: &dyn UpdateSource, url: &str) -> Result<bool> {
        let Some(hash) = self.expected_hash(url) else {
            return Ok(false);
        };
        let Some(response) = source.lookup_resource_with_hash(url, hash).await? else {
            return Ok(false);
        };
        self.cache.put(url, &response).await.or_raise(|| ErrorKind::Storage)?;
        tracing::debug!(group = %self.config.name, url = %url, "Reused hash-pinned asset from a previous version");
        Ok(true)
    }

    /// Store a response taken over from a previous version.
    async fn adopt(&self, url: &str, response: &Response, metadata: UrlMetadata) -> Result<()> {
        self.cache.put(url, response).await.or_raise(|| ErrorKind::Storage)?;
        self.metadata.write(url, &metadata).await.or_raise(|| ErrorKind::Storage)
    }

    /// Fetch and cache `url` during installation, which fails on any
    /// unsuccessful response.
    async fn install(self: &Arc<Self>, url: &str) -> Result<()> {
        let response = self.fetch_and_cache_once(&Request::get(url), false).await?;
        if !response.ok() {
            exn::bail!(ErrorKind::BadResponse { url: url.to_string(), status: response.status });
        }
        Ok(())
    }
}

/// Install-mode specific behaviour on top of an [`AssetCache`].
#[async_trait]
pub trait AssetGroup: Send + Sync {
    fn assets(&self) -> &Arc<AssetCache>;

    /// Bring the group's cache up to date, reusing what `previous` holds.
    async fn initialize_fully(&self, previous: Option<&dyn UpdateSource>) -> Result<()>;

    async fn handle_fetch(&self, request: &Request) -> Result<Option<Response>> {
        self.assets().handle_fetch(request).await
    }
}

pub async fn open_group(
    env: Env,
    config: AssetGroupConfig,
    hashes: Arc<HashMap<String, String>>,
    manifest_hash: &str,
) -> Result<Box<dyn AssetGroup>> {
    let install_mode = config.install_mode;
    let assets = Arc::new(AssetCache::open(env, config, hashes, manifest_hash).await?);
    Ok(match install_mode {
        InstallMode::Prefetch => Box::new(PrefetchAssetGroup::new(assets)),
        InstallMode::Lazy => Box::new(LazyAssetGroup::new(assets)),
    })
}
