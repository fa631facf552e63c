//! Data groups: mutable, pattern-matched resources (API responses and the
//! like) cached with an age limit and a bounded, LRU-evicted entry count.
//!
//! A data group never fails a request. Network trouble becomes a `504` (or a
//! cached answer), and storage trouble is logged and treated as a miss.

use crate::env::Env;
use crate::error::{ErrorKind, Result};
use crate::lru::{LruList, LruState};
use crate::manifest::{DataGroupConfig, Strategy};
use exn::ResultExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use stowaway_asyncutils::{Raced, deadline};
use stowaway_storage::{CacheHandle, Method, Request, Response, Table};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tokio::task::JoinHandle;

const LRU_KEY: &str = "lru";

/// When an entry was stored, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct AgeRecord {
    age: u64,
}

/// Outcome of a network fetch raced against the group's timeout.
enum Fetched {
    Response(Response),
    /// Connectivity failure.
    Offline,
    /// Still in flight; the handle resolves to `None` on connectivity failure.
    TimedOut(JoinHandle<Option<Response>>),
}

pub struct DataGroup {
    env: Env,
    config: DataGroupConfig,
    patterns: Vec<Regex>,
    cache: CacheHandle,
    lru_table: Table,
    age_table: Table,
    /// Loaded from `lru_table` on first use.
    lru: Mutex<Option<LruList>>,
}
impl DataGroup {
    pub async fn open(env: Env, config: DataGroupConfig) -> Result<Self> {
        let patterns = config
            .patterns
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<std::result::Result<Vec<_>, _>>()
            .or_raise(|| ErrorKind::InvalidManifest)?;
        let base = storage_base(&config)?;
        let cache = env.store.open(&env.cache_name(&format!("{base}:cache"))).await.or_raise(|| ErrorKind::Storage)?;
        let lru_table = env.db.open(&format!("{base}:lru")).await.or_raise(|| ErrorKind::Storage)?;
        let age_table = env.db.open(&format!("{base}:age")).await.or_raise(|| ErrorKind::Storage)?;
        Ok(Self { env, config, patterns, cache, lru_table, age_table, lru: Mutex::new(None) })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DataGroupConfig {
        &self.config
    }

    /// Every cache (including metadata tables) this group writes to.
    pub fn cache_names(&self) -> Vec<String> {
        vec![self.cache.name().to_string(), self.lru_table.cache_name().to_string(), self.age_table.cache_name().to_string()]
    }

    fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(url))
    }

    /// `None` when the request isn't for this group.
    pub async fn handle_fetch(self: &Arc<Self>, request: &Request) -> Option<Response> {
        let url = self.env.urls.normalize(&request.url);
        if !self.matches(&url) {
            return None;
        }
        match &request.method {
            Method::Options => return None,
            method if !method.is_cacheable() => {
                tracing::debug!(group = %self.config.name, url = %url, method = %method, "Mutating request, dropping cached entry");
                self.invalidate(&url).await;
                return Some(self.env.safe_fetch(request).await);
            },
            _ => {},
        }
        Some(match self.config.strategy {
            Strategy::Performance => self.handle_with_performance(request, &url).await,
            Strategy::Freshness => self.handle_with_freshness(request, &url).await,
        })
    }

    async fn handle_with_performance(self: &Arc<Self>, request: &Request, url: &str) -> Response {
        let allow_opaque = self.config.cache_opaque_responses.unwrap_or(false);
        if let Some((response, age)) = self.load_from_cache(url, false).await {
            if let Some(refresh_ahead) = self.config.refresh_ahead_ms
                && age >= refresh_ahead
            {
                tracing::debug!(group = %self.config.name, url = %url, age, "Refreshing ahead of expiry");
                let this = Arc::clone(self);
                let request = request.clone();
                tokio::spawn(async move {
                    if let Ok(fresh) = this.env.network.fetch(&request).await {
                        this.cache_response(&request, &fresh, allow_opaque).await;
                    }
                });
            }
            return response;
        }
        match self.fetch_with_timeout(request).await {
            Fetched::Response(response) => {
                self.cache_response(request, &response, allow_opaque).await;
                response
            },
            Fetched::Offline => Response::gateway_timeout(),
            Fetched::TimedOut(pending) => {
                self.cache_when_ready(request, pending, allow_opaque);
                Response::gateway_timeout()
            },
        }
    }

    async fn handle_with_freshness(self: &Arc<Self>, request: &Request, url: &str) -> Response {
        let allow_opaque = self.config.cache_opaque_responses.unwrap_or(true);
        match self.fetch_with_timeout(request).await {
            Fetched::Response(response) => {
                self.cache_response(request, &response, allow_opaque).await;
                response
            },
            Fetched::Offline => match self.load_from_cache(url, true).await {
                Some((cached, _)) => cached,
                None => Response::gateway_timeout(),
            },
            Fetched::TimedOut(pending) => {
                if let Some((cached, _)) = self.load_from_cache(url, true).await {
                    self.cache_when_ready(request, pending, allow_opaque);
                    return cached;
                }
                match pending.await {
                    Ok(Some(response)) => {
                        self.cache_response(request, &response, allow_opaque).await;
                        response
                    },
                    _ => Response::gateway_timeout(),
                }
            },
        }
    }

    async fn fetch_with_timeout(&self, request: &Request) -> Fetched {
        let env = self.env.clone();
        let owned = request.clone();
        let mut pending = tokio::spawn(async move {
            match env.network.fetch(&owned).await {
                Ok(response) => Some(response),
                Err(err) => {
                    tracing::debug!(url = %owned.url, error = ?err, "Network unreachable");
                    None
                },
            }
        });
        let raced = match self.config.timeout() {
            Some(timeout) => deadline(&mut pending, self.env.clock.sleep(timeout)).await,
            None => Raced::Completed((&mut pending).await),
        };
        match raced {
            Raced::Completed(Ok(Some(response))) => Fetched::Response(response),
            Raced::Completed(Ok(None)) => Fetched::Offline,
            Raced::Completed(Err(err)) => {
                tracing::warn!(url = %request.url, error = %err, "Network task failed");
                Fetched::Offline
            },
            Raced::TimedOut => Fetched::TimedOut(pending),
        }
    }

    /// Cache the outcome of a fetch that lost its race, whenever it lands.
    fn cache_when_ready(self: &Arc<Self>, request: &Request, pending: JoinHandle<Option<Response>>, allow_opaque: bool) {
        let this = Arc::clone(self);
        let request = request.clone();
        tokio::spawn(async move {
            if let Ok(Some(response)) = pending.await {
                this.cache_response(&request, &response, allow_opaque).await;
            }
        });
    }

    async fn lru(&self) -> MappedMutexGuard<'_, LruList> {
        let mut guard = self.lru.lock().await;
        if guard.is_none() {
            let state = match self.lru_table.read::<LruState>(LRU_KEY).await {
                Ok(state) => state,
                Err(err) => {
                    if !matches!(&*err, stowaway_storage::error::ErrorKind::NotFound(_)) {
                        tracing::warn!(group = %self.config.name, error = ?err, "Unreadable LRU state, starting empty");
                    }
                    LruState::default()
                },
            };
            *guard = Some(LruList::from_state(state));
        }
        MutexGuard::map(guard, |lru| lru.get_or_insert_with(LruList::new))
    }

    async fn sync_lru(&self, lru: &LruList) {
        if let Err(err) = self.lru_table.write(LRU_KEY, lru.state()).await {
            tracing::warn!(group = %self.config.name, error = ?err, "Failed to persist LRU state");
        }
    }

    /// The cached response and its age, if present and (unless `ignore_age`)
    /// not older than `max_age`. Stale entries are evicted on the way.
    async fn load_from_cache(&self, url: &str, ignore_age: bool) -> Option<(Response, u64)> {
        let response = match self.cache.lookup(url).await {
            Ok(Some(response)) => response,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(group = %self.config.name, url = %url, error = ?err, "Cache lookup failed");
                return None;
            },
        };
        let mut lru = self.lru().await;
        match self.age_table.read::<AgeRecord>(url).await {
            Ok(record) => {
                let age = self.env.now().saturating_sub(record.age);
                if ignore_age || age <= self.config.max_age {
                    tracing::debug!(group = %self.config.name, url = %url, age, "Data cache hit");
                    lru.touch(url);
                    self.sync_lru(&lru).await;
                    return Some((response, age));
                }
                tracing::debug!(group = %self.config.name, url = %url, age, "Data cache entry expired");
            },
            Err(err) => tracing::debug!(group = %self.config.name, url = %url, error = ?err, "Missing age record, treating as expired"),
        }
        lru.remove(url);
        self.clear_entry(url).await;
        self.sync_lru(&lru).await;
        None
    }

    async fn cache_response(&self, request: &Request, response: &Response, allow_opaque: bool) {
        if !(response.ok() || (allow_opaque && response.is_opaque())) {
            return;
        }
        if request.method != Method::Get || self.config.max_size == 0 {
            return;
        }
        let url = self.env.urls.normalize(&request.url);
        let mut lru = self.lru().await;
        let existed = lru.contains(&url);
        while !existed
            && lru.len() >= self.config.max_size
            && let Some(oldest) = lru.evict_oldest()
        {
            tracing::debug!(group = %self.config.name, url = %oldest, "Evicting least recently used entry");
            self.clear_entry(&oldest).await;
        }
        lru.touch(&url);
        match self.cache.put(&url, response).await {
            Ok(()) => {
                if let Err(err) = self.age_table.write(&url, &AgeRecord { age: self.env.now() }).await {
                    tracing::warn!(group = %self.config.name, url = %url, error = ?err, "Failed to record entry age");
                }
            },
            // A failed overwrite leaves the previous entry in place, so it stays tracked.
            Err(err) if existed => {
                tracing::warn!(group = %self.config.name, url = %url, error = ?err, "Failed to refresh cached response");
            },
            Err(err) => {
                tracing::warn!(group = %self.config.name, url = %url, error = ?err, "Failed to cache response");
                lru.remove(&url);
            },
        }
        self.sync_lru(&lru).await;
    }

    async fn invalidate(&self, url: &str) {
        let mut lru = self.lru().await;
        lru.remove(url);
        self.clear_entry(url).await;
        self.sync_lru(&lru).await;
    }

    async fn clear_entry(&self, url: &str) {
        if let Err(err) = self.cache.delete(url).await {
            tracing::warn!(group = %self.config.name, url = %url, error = ?err, "Failed to delete cached entry");
        }
        if let Err(err) = self.age_table.delete(url).await {
            tracing::warn!(group = %self.config.name, url = %url, error = ?err, "Failed to delete age record");
        }
    }

    #[cfg(test)]
    pub(crate) async fn entry_count(&self) -> usize {
        self.cache.keys().await.unwrap().len()
    }

    #[cfg(test)]
    pub(crate) async fn tracked_count(&self) -> usize {
        self.lru().await.len()
    }
}

/// Storage prefix for a group's cache and tables. Configurations that differ
/// in any field get separate storage, so each LRU only ever sees its own
/// entries.
fn storage_base(config: &DataGroupConfig) -> Result<String> {
    let encoded = serde_json::to_vec(config).or_raise(|| ErrorKind::InvalidManifest)?;
    let digest = blake3::hash(&encoded).to_hex();
    Ok(format!("{}:data:dynamic:{}:{}", config.version, config.name, &digest.as_str()[..16]))
}

/// Shares one [`DataGroup`] between every version whose configuration for it
/// is identical, so they all see the same LRU. Keyed on the storage prefix,
/// so two live instances never write to the same cache.
#[derive(Default)]
pub struct DataGroupPool {
    groups: Mutex<HashMap<String, Weak<DataGroup>>>,
}
impl DataGroupPool {
    pub async fn get_or_open(&self, env: &Env, config: &DataGroupConfig) -> Result<Arc<DataGroup>> {
        let key = storage_base(config)?;
        let mut groups = self.groups.lock().await;
        if let Some(group) = groups.get(&key).and_then(Weak::upgrade) {
            return Ok(group);
        }
        let group = Arc::new(DataGroup::open(env.clone(), config.clone()).await?);
        groups.retain(|_, group| group.strong_count() > 0);
        groups.insert(key, Arc::downgrade(&group));
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use std::time::Duration;

    fn config(strategy: Strategy) -> DataGroupConfig {
        DataGroupConfig {
            name: "api".to_string(),
            version: 1,
            strategy,
            patterns: vec!["^/api/".to_string()],
            max_size: 3,
            max_age: 60_000,
            timeout_ms: None,
            refresh_ahead_ms: None,
            cache_opaque_responses: None,
        }
    }

    async fn group(harness: &Harness, config: DataGroupConfig) -> Arc<DataGroup> {
        Arc::new(DataGroup::open(harness.env.clone(), config).await.unwrap())
    }

    fn get(path: &str) -> Request {
        Request::get(format!("http://localhost{path}"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_unmatched_and_options() {
        let harness = Harness::new();
        let group = group(&harness, config(Strategy::Performance)).await;
        assert!(group.handle_fetch(&get("/static/a.js")).await.is_none());
        let options = Request::new(Method::Options, "http://localhost/api/1");
        assert!(group.handle_fetch(&options).await.is_none());
        assert_eq!(harness.network.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_performance_serves_from_cache() {
        let harness = Harness::new();
        harness.network.reply("/api/1", Response::ok_with("one"));
        let group = group(&harness, config(Strategy::Performance)).await;
        let first = group.handle_fetch(&get("/api/1")).await.unwrap();
        let second = group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(first.body, b"one");
        assert_eq!(second.body, b"one");
        assert_eq!(harness.network.calls_to("/api/1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_oldest_past_max_size() {
        let harness = Harness::new();
        let group = group(&harness, config(Strategy::Performance)).await;
        for n in 1..=4 {
            harness.network.reply(&format!("/api/{n}"), Response::ok_with(format!("{n}")));
            group.handle_fetch(&get(&format!("/api/{n}"))).await.unwrap();
        }
        assert_eq!(group.entry_count().await, 3);
        // The oldest entry is gone, so it has to come from the network again.
        group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(harness.network.calls_to("/api/1"), 2);
        group.handle_fetch(&get("/api/4")).await.unwrap();
        assert_eq!(harness.network.calls_to("/api/4"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_protects_from_eviction() {
        let harness = Harness::new();
        let group = group(&harness, config(Strategy::Performance)).await;
        for n in 1..=3 {
            harness.network.reply(&format!("/api/{n}"), Response::ok_with(format!("{n}")));
            group.handle_fetch(&get(&format!("/api/{n}"))).await.unwrap();
        }
        group.handle_fetch(&get("/api/1")).await.unwrap();
        harness.network.reply("/api/4", Response::ok_with("4"));
        group.handle_fetch(&get("/api/4")).await.unwrap();
        group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(harness.network.calls_to("/api/1"), 1);
        group.handle_fetch(&get("/api/2")).await.unwrap();
        assert_eq!(harness.network.calls_to("/api/2"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_boundary() {
        let harness = Harness::new();
        harness.network.reply("/api/1", Response::ok_with("one"));
        let group = group(&harness, config(Strategy::Performance)).await;
        group.handle_fetch(&get("/api/1")).await.unwrap();
        harness.clock.advance(Duration::from_millis(60_000 - 1));
        group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(harness.network.calls_to("/api/1"), 1);
        harness.clock.advance(Duration::from_millis(2));
        group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(harness.network.calls_to("/api/1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_performance_timeout_answers_504_then_caches() {
        let harness = Harness::new();
        harness.network.reply_after("/api/slow", Duration::from_secs(10), Response::ok_with("slow"));
        let group = group(&harness, DataGroupConfig { timeout_ms: Some(1_000), ..config(Strategy::Performance) }).await;
        let response = group.handle_fetch(&get("/api/slow")).await.unwrap();
        assert_eq!(response.status, 504);
        tokio::time::sleep(Duration::from_secs(10)).await;
        let response = group.handle_fetch(&get("/api/slow")).await.unwrap();
        assert_eq!(response.body, b"slow");
        assert_eq!(harness.network.calls_to("/api/slow"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_performance_refreshes_ahead() {
        let harness = Harness::new();
        harness.network.reply("/api/1", Response::ok_with("v1"));
        let group = group(&harness, DataGroupConfig { refresh_ahead_ms: Some(10_000), ..config(Strategy::Performance) }).await;
        group.handle_fetch(&get("/api/1")).await.unwrap();
        harness.network.reply("/api/1", Response::ok_with("v2"));
        harness.clock.advance(Duration::from_secs(20));
        let response = group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(response.body, b"v1");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let response = group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(response.body, b"v2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_prefers_network() {
        let harness = Harness::new();
        harness.network.reply("/api/1", Response::ok_with("v1"));
        let group = group(&harness, config(Strategy::Freshness)).await;
        group.handle_fetch(&get("/api/1")).await.unwrap();
        harness.network.reply("/api/1", Response::ok_with("v2"));
        let response = group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(response.body, b"v2");
        assert_eq!(harness.network.calls_to("/api/1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_timeout_falls_back_to_expired_cache() {
        let harness = Harness::new();
        harness.network.reply("/api/1", Response::ok_with("v1"));
        let group = group(&harness, DataGroupConfig { timeout_ms: Some(1_000), ..config(Strategy::Freshness) }).await;
        group.handle_fetch(&get("/api/1")).await.unwrap();
        harness.clock.advance(Duration::from_secs(120));
        harness.network.reply_after("/api/1", Duration::from_secs(5), Response::ok_with("v2"));
        let response = group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(response.body, b"v1");
        // The late answer still lands in the cache.
        tokio::time::sleep(Duration::from_secs(5)).await;
        harness.network.set_offline(true);
        let response = group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(response.body, b"v2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_timeout_without_cache_waits() {
        let harness = Harness::new();
        harness.network.reply_after("/api/1", Duration::from_secs(5), Response::ok_with("late"));
        let group = group(&harness, DataGroupConfig { timeout_ms: Some(1_000), ..config(Strategy::Freshness) }).await;
        let response = group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(response.body, b"late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_offline() {
        let harness = Harness::new();
        let group = group(&harness, config(Strategy::Freshness)).await;
        harness.network.set_offline(true);
        let response = group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(response.status, 504);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opaque_caching_depends_on_strategy() {
        let harness = Harness::new();
        harness.network.reply("/api/opaque", Response::opaque());
        let performance = group(&harness, config(Strategy::Performance)).await;
        performance.handle_fetch(&get("/api/opaque")).await.unwrap();
        assert_eq!(performance.entry_count().await, 0);
        let freshness = group(&harness, DataGroupConfig { name: "fresh".into(), ..config(Strategy::Freshness) }).await;
        freshness.handle_fetch(&get("/api/opaque")).await.unwrap();
        assert_eq!(freshness.entry_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_invalidates() {
        let harness = Harness::new();
        harness.network.reply("/api/1", Response::ok_with("v1"));
        let group = group(&harness, config(Strategy::Performance)).await;
        group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(group.entry_count().await, 1);
        harness.network.set_offline(true);
        let post = Request::new(Method::Post, "http://localhost/api/1");
        let response = group.handle_fetch(&post).await.unwrap();
        assert_eq!(response.status, 504);
        assert_eq!(group.entry_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_not_cached() {
        let harness = Harness::new();
        harness.network.reply("/api/1", Response::new(500, "boom"));
        let group = group(&harness, config(Strategy::Performance)).await;
        assert_eq!(group.handle_fetch(&get("/api/1")).await.unwrap().status, 500);
        assert_eq!(group.entry_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_survives_reopen() {
        let harness = Harness::new();
        let first = group(&harness, config(Strategy::Performance)).await;
        for n in 1..=3 {
            harness.network.reply(&format!("/api/{n}"), Response::ok_with(format!("{n}")));
            first.handle_fetch(&get(&format!("/api/{n}"))).await.unwrap();
        }
        drop(first);
        let reopened = group(&harness, config(Strategy::Performance)).await;
        harness.network.reply("/api/4", Response::ok_with("4"));
        reopened.handle_fetch(&get("/api/4")).await.unwrap();
        assert_eq!(reopened.entry_count().await, 3);
        reopened.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(harness.network.calls_to("/api/1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_shares_identical_groups() {
        let harness = Harness::new();
        let pool = DataGroupPool::default();
        let a = pool.get_or_open(&harness.env, &config(Strategy::Performance)).await.unwrap();
        let b = pool.get_or_open(&harness.env, &config(Strategy::Performance)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = pool.get_or_open(&harness.env, &DataGroupConfig { max_size: 5, ..config(Strategy::Performance) }).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        let base = storage_base(&config(Strategy::Performance)).unwrap();
        assert!(base.starts_with("1:data:dynamic:api:"));
        assert_eq!(a.cache_names()[0], format!("stowaway:{base}:cache"));
        assert_eq!(a.cache_names()[1], format!("stowaway:db:{base}:lru"));
        assert!(a.cache_names().iter().all(|name| !c.cache_names().contains(name)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_differing_configs_keep_separate_lrus() {
        let harness = Harness::new();
        let pool = DataGroupPool::default();
        let small = pool.get_or_open(&harness.env, &config(Strategy::Performance)).await.unwrap();
        let large = pool.get_or_open(&harness.env, &DataGroupConfig { max_size: 5, ..config(Strategy::Performance) }).await.unwrap();
        for n in 1..=8 {
            harness.network.reply(&format!("/api/{n}"), Response::ok_with(format!("{n}")));
        }
        for n in 1..=3 {
            small.handle_fetch(&get(&format!("/api/{n}"))).await.unwrap();
        }
        for n in 4..=5 {
            large.handle_fetch(&get(&format!("/api/{n}"))).await.unwrap();
        }
        for n in 6..=8 {
            small.handle_fetch(&get(&format!("/api/{n}"))).await.unwrap();
        }
        for (group, max_size) in [(&small, 3), (&large, 5)] {
            let stored = group.entry_count().await;
            assert_eq!(stored, group.tracked_count().await);
            assert!(stored <= max_size);
        }
        assert_eq!(small.entry_count().await, 3);
        assert_eq!(large.entry_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_entry() {
        let harness = Harness::new();
        harness.network.reply("/api/1", Response::ok_with("v1"));
        let group = group(&harness, config(Strategy::Freshness)).await;
        group.handle_fetch(&get("/api/1")).await.unwrap();
        harness.store.fail_writes(true);
        harness.network.reply("/api/1", Response::ok_with("v2"));
        let response = group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(response.body, b"v2");
        harness.store.fail_writes(false);
        assert_eq!(group.entry_count().await, 1);
        assert_eq!(group.tracked_count().await, 1);
        harness.network.set_offline(true);
        let response = group.handle_fetch(&get("/api/1")).await.unwrap();
        assert_eq!(response.body, b"v1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_write_is_not_tracked() {
        let harness = Harness::new();
        harness.network.reply("/api/1", Response::ok_with("v1"));
        let group = group(&harness, config(Strategy::Performance)).await;
        harness.store.fail_writes(true);
        group.handle_fetch(&get("/api/1")).await.unwrap();
        harness.store.fail_writes(false);
        assert_eq!(group.entry_count().await, 0);
        assert_eq!(group.tracked_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_pattern() {
        let harness = Harness::new();
        let result = DataGroup::open(harness.env.clone(), DataGroupConfig { patterns: vec!["(".into()], ..config(Strategy::Performance) }).await;
        assert!(matches!(&*result.err().unwrap(), ErrorKind::InvalidManifest));
    }
}
