//! One installed application version.

use crate::assets::{AssetGroup, CacheState, CacheStatus, UpdateSource, open_group};
use crate::data::{DataGroup, DataGroupPool};
use crate::env::Env;
use crate::error::{ErrorKind, Result};
use crate::manifest::{Manifest, NavigationStrategy};
use crate::messages::VersionInfo;
use async_trait::async_trait;
use exn::ResultExt;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use stowaway_storage::{Method, Request, RequestMode, Response};

/// Routes requests through the caches built from one manifest.
pub struct AppVersion {
    env: Env,
    hash: String,
    manifest: Manifest,
    /// Normalized.
    index: String,
    asset_groups: Vec<Box<dyn AssetGroup>>,
    data_groups: Vec<Arc<DataGroup>>,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    okay: AtomicBool,
}
impl AppVersion {
    pub async fn new(env: Env, pool: &DataGroupPool, manifest: Manifest, hash: String) -> Result<Self> {
        let hashes: Arc<HashMap<String, String>> =
            Arc::new(manifest.hash_table.iter().map(|(url, hash)| (env.urls.normalize(url), hash.clone())).collect());
        let mut asset_groups = Vec::with_capacity(manifest.asset_groups.len());
        for config in &manifest.asset_groups {
            asset_groups.push(open_group(env.clone(), config.clone(), Arc::clone(&hashes), &hash).await?);
        }
        let mut data_groups = Vec::with_capacity(manifest.data_groups.len());
        for config in &manifest.data_groups {
            data_groups.push(pool.get_or_open(&env, config).await?);
        }
        let compile = |positive: bool| {
            manifest
                .navigation_urls
                .iter()
                .filter(|rule| rule.positive == positive)
                .map(|rule| Regex::new(&rule.regex))
                .collect::<std::result::Result<Vec<_>, _>>()
                .or_raise(|| ErrorKind::InvalidManifest)
        };
        let include = compile(true)?;
        let exclude = compile(false)?;
        let index = env.urls.normalize(&manifest.index);
        Ok(Self { env, hash, manifest, index, asset_groups, data_groups, include, exclude, okay: AtomicBool::new(true) })
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// `false` once the version has failed; it won't be assigned to clients.
    pub fn okay(&self) -> bool {
        self.okay.load(Ordering::SeqCst)
    }

    pub fn mark_failed(&self) {
        self.okay.store(false, Ordering::SeqCst);
    }

    pub fn version_info(&self) -> VersionInfo {
        VersionInfo { hash: self.hash.clone(), app_data: self.manifest.app_data.clone() }
    }

    /// Every cache this version reads or writes.
    pub fn cache_names(&self) -> Vec<String> {
        let assets = self.asset_groups.iter().flat_map(|group| group.assets().cache_names());
        let data = self.data_groups.iter().flat_map(|group| group.cache_names());
        assets.chain(data).collect()
    }

    /// A top-level HTML page load whose path passes the navigation rules.
    pub fn is_navigation_request(&self, request: &Request) -> bool {
        if request.method != Method::Get || request.mode != RequestMode::Navigate {
            return false;
        }
        if !request.headers.get("Accept").is_some_and(|accept| accept.contains("text/html")) {
            return false;
        }
        let path = self.env.urls.navigation_path(&request.url);
        self.include.iter().any(|rule| rule.is_match(&path)) && !self.exclude.iter().any(|rule| rule.is_match(&path))
    }

    /// Asset groups, then data groups, then (for navigations) the index.
    pub async fn handle_fetch(&self, request: &Request) -> Result<Option<Response>> {
        if let Some(response) = self.lookup(request).await? {
            return Ok(Some(response));
        }
        if !self.is_navigation_request(request) || self.env.urls.normalize(&request.url) == self.index {
            return Ok(None);
        }
        if self.manifest.navigation_request_strategy == NavigationStrategy::Freshness {
            match self.env.network.fetch(request).await {
                Ok(response) => return Ok(Some(response)),
                Err(err) => tracing::debug!(url = %request.url, error = ?err, "Navigation fetch failed, serving index"),
            }
        }
        tracing::trace!(url = %request.url, index = %self.index, "Serving index for navigation");
        // The index request goes through the groups only: it can never fall
        // back again.
        self.lookup(&Request::get(self.env.urls.absolute(&self.index))).await
    }

    async fn lookup(&self, request: &Request) -> Result<Option<Response>> {
        for group in &self.asset_groups {
            if let Some(response) = group.handle_fetch(request).await? {
                return Ok(Some(response));
            }
        }
        for group in &self.data_groups {
            if let Some(response) = group.handle_fetch(request).await {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Install every asset group, reusing what `previous` already holds.
    #[tracing::instrument(skip_all, fields(version = %self.hash))]
    pub async fn initialize_fully(&self, previous: Option<&dyn UpdateSource>) -> Result<()> {
        for group in &self.asset_groups {
            if let Err(err) = group.initialize_fully(previous).await {
                tracing::warn!(group = %group.assets().name(), error = ?err, "Asset group failed to initialize");
                self.mark_failed();
                return Err(err);
            }
        }
        tracing::debug!("Version fully initialized");
        Ok(())
    }
}

#[async_trait]
impl UpdateSource for AppVersion {
    async fn lookup_resource_with_hash(&self, url: &str, hash: &str) -> Result<Option<Response>> {
        for group in &self.asset_groups {
            if let Some(response) = group.assets().cached_with_hash(url, hash).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    async fn lookup_resource_without_hash(&self, url: &str) -> Result<Option<CacheState>> {
        for group in &self.asset_groups {
            if let Some(state) = group.assets().fetch_from_cache_only(url).await? {
                return Ok(Some(state));
            }
        }
        Ok(None)
    }

    async fn previously_cached_resources(&self) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        for group in &self.asset_groups {
            urls.extend(group.assets().unhashed_resources().await?);
        }
        Ok(urls)
    }

    async fn recent_cache_status(&self, url: &str) -> Result<CacheStatus> {
        for group in &self.asset_groups {
            if group.assets().matches(url) {
                return group.assets().cache_status(url).await;
            }
        }
        Ok(CacheStatus::NotCached)
    }
}
