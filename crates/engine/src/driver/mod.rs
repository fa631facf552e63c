//! The top-level state machine.
//!
//! The driver owns every known [`AppVersion`] (keyed by manifest hash) and
//! the table pinning each client to one of them. It boots lazily on the
//! first request or message, serves requests through the pinned version,
//! detects and installs updates, moves clients between versions, and
//! degrades when versions break.

mod state;

pub use self::state::{CONTROL_TABLE, DriverState, PersistedState, SCHEMA, STATE_KEY};
use crate::assets::{CacheState, CacheStatus, UpdateSource};
use crate::data::DataGroupPool;
use crate::env::Env;
use crate::error::{ErrorKind, Result};
use crate::idle::IdleSnapshot;
use crate::manifest::Manifest;
use crate::messages::{Command, Notice, VersionInfo};
use crate::version::AppVersion;
use async_trait::async_trait;
use exn::ResultExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use stowaway_storage::{CacheMode, Request, RequestMode, Response, Table};
use tokio::sync::OnceCell;

const NOMINAL: &str = "(nominal)";

/// An intercepted request and the client(s) it belongs to.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,
    /// The client that issued the request.
    pub client_id: Option<String>,
    /// For navigations, the client that will be created by this request.
    pub resulting_client_id: Option<String>,
}
impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self { request, client_id: None, resulting_client_id: None }
    }

    pub fn from_client(request: Request, client_id: impl Into<String>) -> Self {
        Self { client_id: Some(client_id.into()), ..Self::new(request) }
    }

    /// The client this request should be served for.
    fn client(&self) -> Option<&str> {
        self.resulting_client_id.as_deref().or(self.client_id.as_deref())
    }
}

struct Registry {
    state: DriverState,
    state_message: String,
    versions: BTreeMap<String, Arc<AppVersion>>,
    /// Client id → manifest hash.
    clients: BTreeMap<String, String>,
    latest_hash: Option<String>,
    last_update_check: Option<u64>,
}
impl Registry {
    fn latest(&self) -> Option<Arc<AppVersion>> {
        self.latest_hash.as_ref().and_then(|hash| self.versions.get(hash)).cloned()
    }

    fn persisted(&self) -> PersistedState {
        PersistedState {
            schema: SCHEMA,
            manifests: self.versions.iter().map(|(hash, version)| (hash.clone(), version.manifest().clone())).collect(),
            assignments: self.clients.clone(),
            latest: self.latest_hash.clone().unwrap_or_default(),
        }
    }
}

/// Serializable snapshot for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugState {
    pub state: DriverState,
    pub why: String,
    pub latest_hash: Option<String>,
    pub last_update_check: Option<u64>,
    pub versions: Vec<DebugVersion>,
    pub idle: IdleSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugVersion {
    pub hash: String,
    pub okay: bool,
    pub clients: Vec<String>,
}

pub struct Driver {
    env: Env,
    this: Weak<Driver>,
    pool: DataGroupPool,
    registry: Mutex<Registry>,
    initialized: OnceCell<std::result::Result<(), ErrorKind>>,
    /// Serializes update checks.
    update_lock: tokio::sync::Mutex<()>,
    /// Serializes writes of the control record, so an older snapshot never
    /// overwrites a newer one.
    sync_lock: tokio::sync::Mutex<()>,
    scheduled_nav_update_check: AtomicBool,
}
impl Driver {
    pub fn new(env: Env) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            env,
            this: this.clone(),
            pool: DataGroupPool::default(),
            registry: Mutex::new(Registry {
                state: DriverState::Normal,
                state_message: NOMINAL.to_string(),
                versions: BTreeMap::new(),
                clients: BTreeMap::new(),
                latest_hash: None,
                last_update_check: None,
            }),
            initialized: OnceCell::new(),
            update_lock: tokio::sync::Mutex::new(()),
            sync_lock: tokio::sync::Mutex::new(()),
            scheduled_nav_update_check: AtomicBool::new(false),
        })
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> DriverState {
        self.registry().state
    }

    pub fn latest_hash(&self) -> Option<String> {
        self.registry().latest_hash.clone()
    }

    /// Hash of the version `client_id` is pinned to.
    pub fn client_version(&self, client_id: &str) -> Option<String> {
        self.registry().clients.get(client_id).cloned()
    }

    pub fn version_hashes(&self) -> Vec<String> {
        self.registry().versions.keys().cloned().collect()
    }

    fn set_state(&self, state: DriverState, message: String) {
        let mut registry = self.registry();
        registry.state = state;
        registry.state_message = message;
    }

    fn lookup_version(&self, hash: &str) -> Result<Arc<AppVersion>> {
        match self.registry().versions.get(hash) {
            Some(version) => Ok(Arc::clone(version)),
            None => exn::bail!(ErrorKind::UnknownVersion(hash.to_string())),
        }
    }

    /// Entry point for every intercepted request.
    ///
    /// `None` means "not handled": the host should perform the request as if
    /// the engine weren't there. Errors never escape; at worst the request is
    /// re-served straight from the network.
    pub async fn handle_fetch(&self, event: &FetchEvent) -> Option<Response> {
        if self.should_bypass(&event.request) {
            tracing::trace!(url = %event.request.url, "Bypassing engine");
            return None;
        }
        if self.state() == DriverState::SafeMode {
            self.env.idle.trigger();
            return None;
        }
        let response = self.respond(event).await;
        self.env.idle.trigger();
        response
    }

    fn should_bypass(&self, request: &Request) -> bool {
        let bypass = &self.env.config.bypass_parameter;
        request.headers.contains(bypass)
            || self.env.urls.has_query_flag(&request.url, bypass)
            || (request.cache == CacheMode::OnlyIfCached && request.mode != RequestMode::SameOrigin)
            || self.env.urls.is_mixed_content(&request.url)
    }

    async fn respond(&self, event: &FetchEvent) -> Option<Response> {
        let request = &event.request;
        if self.ensure_initialized().await.is_err() {
            return Some(self.env.safe_fetch(request).await);
        }
        if request.mode == RequestMode::Navigate && !self.scheduled_nav_update_check.swap(true, Ordering::SeqCst) {
            let this = self.this.clone();
            self.env.idle.schedule("check-updates-on-navigation", async move {
                let Some(driver) = this.upgrade() else {
                    return Ok(());
                };
                driver.scheduled_nav_update_check.store(false, Ordering::SeqCst);
                driver.check_for_update().await.map(|_| ())
            });
        }
        let version = match self.assign_version(event).await {
            Ok(Some(version)) => version,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(url = %request.url, error = ?err, "Could not assign a version");
                return Some(self.env.safe_fetch(request).await);
            },
        };
        match version.handle_fetch(request).await {
            Ok(response) => response,
            Err(err) => {
                let kind = (*err).clone();
                if kind.is_unrecoverable() {
                    self.notify_clients_about_unrecoverable_state(&version, &kind).await;
                }
                if kind.is_critical() {
                    tracing::error!(version = %version.hash(), url = %request.url, error = ?err, "Version failed while serving");
                    self.version_failed(&version, &kind);
                } else {
                    tracing::warn!(version = %version.hash(), url = %request.url, error = ?err, "Request failed, falling back to network");
                }
                Some(self.env.safe_fetch(request).await)
            },
        }
    }

    /// Boot once; every later call observes the same outcome.
    async fn ensure_initialized(&self) -> std::result::Result<(), ErrorKind> {
        self.initialized
            .get_or_init(|| async {
                match self.boot().await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        let kind = (*err).clone();
                        tracing::error!(error = ?err, "Initialization failed, entering safe mode");
                        self.set_state(DriverState::SafeMode, format!("Initialization failed due to error: {kind}"));
                        Err(kind)
                    },
                }
            })
            .await
            .clone()
    }

    /// Boot now if that hasn't happened yet.
    pub async fn initialize(&self) -> Result<()> {
        self.ensure_initialized().await.map_err(exn::Exn::from)
    }

    async fn control_table(&self) -> Result<Table> {
        self.env.db.open(CONTROL_TABLE).await.or_raise(|| ErrorKind::Storage)
    }

    #[tracing::instrument(skip_all)]
    async fn boot(&self) -> Result<()> {
        let table = self.control_table().await.or_raise(|| ErrorKind::Boot)?;
        let persisted = match table.read::<PersistedState>(STATE_KEY).await {
            Ok(persisted) if persisted.schema == SCHEMA => {
                self.schedule_update_check("init post-load (update)");
                persisted
            },
            outcome => {
                match outcome {
                    Ok(persisted) => tracing::info!(schema = persisted.schema, "Discarding state with unknown schema"),
                    Err(err) if matches!(&*err, stowaway_storage::error::ErrorKind::NotFound(_)) => {
                        tracing::info!("No persisted state, fetching manifest")
                    },
                    Err(err) => tracing::warn!(error = ?err, "Unreadable persisted state, fetching manifest"),
                }
                let (manifest, hash) = match self.fetch_latest_manifest(false).await.or_raise(|| ErrorKind::Boot)? {
                    Some(latest) => latest,
                    None => exn::bail!(ErrorKind::Boot),
                };
                let persisted = PersistedState::bootstrap(manifest, hash);
                table.write(STATE_KEY, &persisted).await.or_raise(|| ErrorKind::Boot)?;
                persisted
            },
        };
        self.schedule_cleanup("init post-load (cleanup)");

        let mut versions = BTreeMap::new();
        for (hash, manifest) in persisted.manifests {
            match AppVersion::new(self.env.clone(), &self.pool, manifest, hash.clone()).await {
                Ok(version) => {
                    versions.insert(hash, Arc::new(version));
                },
                Err(err) => tracing::warn!(version = %hash, error = ?err, "Skipping version that failed to load"),
            }
        }
        let latest = persisted.latest;
        if !versions.contains_key(&latest) {
            tracing::error!(latest = %latest, "Latest version is missing from persisted state");
            exn::bail!(ErrorKind::Boot);
        }
        let mut clients = BTreeMap::new();
        for (client, hash) in persisted.assignments {
            if versions.contains_key(&hash) {
                clients.insert(client, hash);
            } else {
                tracing::warn!(client = %client, version = %hash, "Client pinned to unknown version, moving it to latest");
                clients.insert(client, latest.clone());
            }
        }
        let hashes: Vec<String> = versions.keys().cloned().collect();
        {
            let mut registry = self.registry();
            registry.versions = versions;
            registry.clients = clients;
            registry.latest_hash = Some(latest.clone());
        }
        for hash in hashes {
            self.schedule_initialization(hash);
        }
        tracing::info!(latest = %latest, "Engine initialized");
        Ok(())
    }

    fn schedule_initialization(&self, hash: String) {
        let this = self.this.clone();
        self.env.idle.schedule(format!("init post-load ({hash})"), async move {
            let Some(driver) = this.upgrade() else {
                return Ok(());
            };
            let version = driver.lookup_version(&hash)?;
            if let Err(err) = version.initialize_fully(None).await {
                let kind = (*err).clone();
                driver.version_failed(&version, &kind);
                return Err(err);
            }
            Ok(())
        });
    }

    fn schedule_update_check(&self, description: &str) {
        let this = self.this.clone();
        self.env.idle.schedule(description, async move {
            match this.upgrade() {
                Some(driver) => driver.check_for_update().await.map(|_| ()),
                None => Ok(()),
            }
        });
    }

    fn schedule_cleanup(&self, description: &str) {
        let this = self.this.clone();
        self.env.idle.schedule(description, async move {
            match this.upgrade() {
                Some(driver) => driver.cleanup_caches().await,
                None => Ok(()),
            }
        });
    }

    /// Which version serves `event`, pinning new clients along the way.
    ///
    /// `None` when no version may serve it (new clients while the latest
    /// version is broken).
    async fn assign_version(&self, event: &FetchEvent) -> Result<Option<Arc<AppVersion>>> {
        let (state, pinned, latest) = {
            let registry = self.registry();
            let pinned = event.client().and_then(|client| registry.clients.get(client)).cloned();
            (registry.state, pinned, registry.latest_hash.clone())
        };
        let Some(latest) = latest else {
            exn::bail!(ErrorKind::UnknownVersion("latest".to_string()));
        };
        let Some(client) = event.client() else {
            return match state {
                DriverState::Normal => self.lookup_version(&latest).map(Some),
                _ => Ok(None),
            };
        };
        let Some(hash) = pinned else {
            if state != DriverState::Normal {
                return Ok(None);
            }
            self.registry().clients.insert(client.to_string(), latest.clone());
            if let Err(err) = self.sync().await {
                tracing::warn!(client = %client, error = ?err, "Failed to persist new client assignment");
            }
            return self.lookup_version(&latest).map(Some);
        };
        let version = self.lookup_version(&hash)?;
        if state == DriverState::Normal
            && hash != latest
            && (version.is_navigation_request(&event.request) || !version.okay())
        {
            tracing::debug!(client = %client, from = %hash, to = %latest, "Moving client to latest version");
            if self.env.clients.is_live(client).await {
                self.update_client(client).await?;
            }
            return self.lookup_version(&latest).map(Some);
        }
        Ok(Some(version))
    }

    /// Fetch and parse the manifest, bypassing every cache on the way.
    ///
    /// A `404` means the application is gone: all caches are wiped and the
    /// engine unregisters itself. With `ignore_offline`, a `503`/`504` is
    /// reported as `None` rather than an error.
    async fn fetch_latest_manifest(&self, ignore_offline: bool) -> Result<Option<(Manifest, String)>> {
        let url = self.env.urls.cache_bust(&self.env.config.manifest_url, self.env.now());
        let response = self.env.safe_fetch(&Request::get(url)).await;
        if !response.ok() {
            if response.status == 404 {
                tracing::warn!("Manifest is gone, wiping caches and unregistering");
                self.delete_all_caches().await;
                if let Err(err) = self.env.registration.unregister().await {
                    tracing::warn!(error = ?err, "Failed to unregister");
                }
            } else if ignore_offline && matches!(response.status, 503 | 504) {
                tracing::debug!(status = response.status, "Offline, skipping manifest fetch");
                return Ok(None);
            }
            exn::bail!(ErrorKind::ManifestFetch(response.status));
        }
        self.registry().last_update_check = Some(self.env.now());
        Manifest::parse(&response.body).map(Some)
    }

    /// Look for a new version and install it if there is one.
    ///
    /// Returns `true` if a new version was installed. Being offline is not an
    /// error, just `false`.
    #[tracing::instrument(skip_all)]
    pub async fn check_for_update(&self) -> Result<bool> {
        let _updating = self.update_lock.lock().await;
        let Some((manifest, hash)) = self.fetch_latest_manifest(true).await? else {
            return Ok(false);
        };
        let known = self.registry().versions.get(&hash).cloned();
        if let Some(known) = known {
            tracing::debug!(version = %hash, "No new version");
            self.broadcast(&Notice::NoNewVersionDetected { version: known.version_info() }).await;
            return Ok(false);
        }
        tracing::info!(version = %hash, "New version detected");
        let version = VersionInfo { hash: hash.clone(), app_data: manifest.app_data.clone() };
        self.broadcast(&Notice::VersionDetected { version }).await;
        self.setup_update(manifest, hash).await?;
        Ok(true)
    }

    async fn setup_update(&self, manifest: Manifest, hash: String) -> Result<()> {
        let info = VersionInfo { hash: hash.clone(), app_data: manifest.app_data.clone() };
        match self.install_version(manifest, hash).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(version = %info.hash, error = ?err, "Version installation failed");
                let error = (*err).to_string();
                self.broadcast(&Notice::VersionInstallationFailed { version: info, error }).await;
                Err(err)
            },
        }
    }

    async fn install_version(&self, manifest: Manifest, hash: String) -> Result<()> {
        let expected = self.env.config.supported_config_version;
        if manifest.config_version != expected {
            tracing::error!(expected, actual = manifest.config_version, "Unsupported manifest, wiping caches and unregistering");
            self.delete_all_caches().await;
            if let Err(err) = self.env.registration.unregister().await {
                tracing::warn!(error = ?err, "Failed to unregister");
            }
            exn::bail!(ErrorKind::ConfigVersion { expected, actual: manifest.config_version });
        }
        let version = AppVersion::new(self.env.clone(), &self.pool, manifest, hash.clone()).await.or_raise(|| ErrorKind::Install)?;
        let version = Arc::new(version);
        version.initialize_fully(Some(&VersionsSource { driver: self })).await.or_raise(|| ErrorKind::Install)?;
        {
            let mut registry = self.registry();
            registry.versions.insert(hash.clone(), Arc::clone(&version));
            registry.latest_hash = Some(hash.clone());
            if registry.state == DriverState::ExistingClientsOnly {
                registry.state = DriverState::Normal;
                registry.state_message = NOMINAL.to_string();
            }
        }
        self.sync().await?;
        tracing::info!(version = %hash, "Version ready");
        self.notify_clients_about_version_ready(&version).await;
        Ok(())
    }

    /// Move `client_id` to the latest version. Returns `false` if it's
    /// already there.
    pub async fn update_client(&self, client_id: &str) -> Result<bool> {
        let (previous, current) = {
            let mut registry = self.registry();
            let Some(latest) = registry.latest() else {
                exn::bail!(ErrorKind::UnknownVersion("latest".to_string()));
            };
            let existing = registry.clients.get(client_id).cloned();
            if existing.as_deref() == Some(latest.hash()) {
                return Ok(false);
            }
            let previous = existing.and_then(|hash| registry.versions.get(&hash)).map(|version| version.version_info());
            registry.clients.insert(client_id.to_string(), latest.hash().to_string());
            (previous, latest.version_info())
        };
        self.sync().await?;
        tracing::info!(client = %client_id, version = %current.hash, "Client activated latest version");
        self.env.clients.post_message(client_id, &Notice::VersionActivated { previous, current }).await;
        Ok(true)
    }

    /// Forget clients that are gone and versions nobody uses, then delete
    /// every engine cache no remaining version needs.
    #[tracing::instrument(skip_all)]
    pub async fn cleanup_caches(&self) -> Result<()> {
        let live: HashSet<String> = self.env.clients.live().await.into_iter().collect();
        let (obsolete, mut in_use) = {
            let mut registry = self.registry();
            registry.clients.retain(|client, _| live.contains(client));
            let pinned: HashSet<String> = registry.clients.values().cloned().collect();
            let latest = registry.latest_hash.clone();
            let obsolete: Vec<String> = registry
                .versions
                .keys()
                .filter(|hash| !pinned.contains(*hash) && latest.as_ref() != Some(*hash))
                .cloned()
                .collect();
            for hash in &obsolete {
                registry.versions.remove(hash);
            }
            let in_use: HashSet<String> = registry.versions.values().flat_map(|version| version.cache_names()).collect();
            (obsolete, in_use)
        };
        in_use.insert(self.env.db.cache_name(CONTROL_TABLE));
        if !obsolete.is_empty() {
            tracing::info!(versions = ?obsolete, "Dropped unused versions");
        }
        self.sync().await?;
        let names = self.env.store.keys().await.or_raise(|| ErrorKind::Storage)?;
        for name in names.into_iter().filter(|name| self.env.owns_cache(name) && !in_use.contains(name)) {
            tracing::debug!(cache = %name, "Deleting unused cache");
            if let Err(err) = self.env.store.delete(&name).await {
                tracing::warn!(cache = %name, error = ?err, "Failed to delete cache");
            }
        }
        Ok(())
    }

    async fn delete_all_caches(&self) {
        let names = match self.env.store.keys().await {
            Ok(names) => names,
            Err(err) => {
                tracing::warn!(error = ?err, "Failed to list caches");
                return;
            },
        };
        for name in names.into_iter().filter(|name| self.env.owns_cache(name)) {
            if let Err(err) = self.env.store.delete(&name).await {
                tracing::warn!(cache = %name, error = ?err, "Failed to delete cache");
            }
        }
    }

    /// Degrade after `version` broke: a broken latest version stops taking
    /// new clients, an older one just stops being used.
    fn version_failed(&self, version: &AppVersion, error: &ErrorKind) {
        let mut registry = self.registry();
        if !registry.versions.contains_key(version.hash()) {
            return;
        }
        if registry.latest_hash.as_deref() == Some(version.hash()) {
            tracing::error!(version = %version.hash(), error = %error, "Latest version failed, serving existing clients only");
            registry.state = DriverState::ExistingClientsOnly;
            registry.state_message = format!("Degraded due to: {error}");
        } else {
            tracing::warn!(version = %version.hash(), error = %error, "Version failed");
            version.mark_failed();
        }
    }

    /// Persist the current registry.
    async fn sync(&self) -> Result<()> {
        let _syncing = self.sync_lock.lock().await;
        let persisted = self.registry().persisted();
        let table = self.control_table().await?;
        table.write(STATE_KEY, &persisted).await.or_raise(|| ErrorKind::Storage)
    }

    async fn broadcast(&self, notice: &Notice) {
        for client in self.env.clients.live().await {
            self.env.clients.post_message(&client, notice).await;
        }
    }

    async fn notify_clients_about_version_ready(&self, latest: &AppVersion) {
        let live = self.env.clients.live().await;
        let pinned: Vec<(String, VersionInfo)> = {
            let registry = self.registry();
            live.into_iter()
                .filter_map(|client| {
                    let hash = registry.clients.get(&client)?;
                    if hash == latest.hash() {
                        return None;
                    }
                    let version = registry.versions.get(hash)?;
                    Some((client, version.version_info()))
                })
                .collect()
        };
        for (client, current_version) in pinned {
            let notice = Notice::VersionReady { current_version, latest_version: latest.version_info() };
            self.env.clients.post_message(&client, &notice).await;
        }
    }

    async fn notify_clients_about_unrecoverable_state(&self, version: &AppVersion, error: &ErrorKind) {
        let affected: Vec<String> = {
            let registry = self.registry();
            registry.clients.iter().filter(|(_, hash)| *hash == version.hash()).map(|(client, _)| client.clone()).collect()
        };
        let notice = Notice::UnrecoverableState { reason: error.to_string() };
        for client in affected {
            self.env.clients.post_message(&client, &notice).await;
        }
    }

    /// Handle a command sent by client `from`.
    pub async fn handle_message(&self, command: Command, from: &str) {
        if self.state() == DriverState::SafeMode {
            return;
        }
        if self.ensure_initialized().await.is_err() {
            return;
        }
        let nonce = command.nonce();
        let outcome = match command {
            Command::Initialize => return,
            Command::CheckForUpdates { .. } => self.check_for_update().await,
            Command::ActivateUpdate { .. } => self.update_client(from).await,
        };
        let notice = match outcome {
            Ok(result) => Notice::OperationCompleted { nonce, result: Some(result), error: None },
            Err(err) => Notice::OperationCompleted { nonce, result: None, error: Some((*err).to_string()) },
        };
        self.env.clients.post_message(from, &notice).await;
    }

    pub fn debug_state(&self) -> DebugState {
        let registry = self.registry();
        let versions = registry
            .versions
            .iter()
            .map(|(hash, version)| DebugVersion {
                hash: hash.clone(),
                okay: version.okay(),
                clients: registry.clients.iter().filter(|(_, pinned)| *pinned == hash).map(|(client, _)| client.clone()).collect(),
            })
            .collect();
        DebugState {
            state: registry.state,
            why: registry.state_message.clone(),
            latest_hash: registry.latest_hash.clone(),
            last_update_check: registry.last_update_check,
            versions,
            idle: self.env.idle.snapshot(),
        }
    }
}

/// What a version being installed may reuse: hash-matched bytes from any
/// known version, everything else from the current latest.
struct VersionsSource<'a> {
    driver: &'a Driver,
}
impl VersionsSource<'_> {
    fn versions(&self) -> Vec<Arc<AppVersion>> {
        self.driver.registry().versions.values().cloned().collect()
    }

    fn latest(&self) -> Option<Arc<AppVersion>> {
        self.driver.registry().latest()
    }
}

#[async_trait]
impl UpdateSource for VersionsSource<'_> {
    async fn lookup_resource_with_hash(&self, url: &str, hash: &str) -> Result<Option<Response>> {
        for version in self.versions() {
            if let Some(response) = version.lookup_resource_with_hash(url, hash).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    async fn lookup_resource_without_hash(&self, url: &str) -> Result<Option<CacheState>> {
        match self.latest() {
            Some(latest) => latest.lookup_resource_without_hash(url).await,
            None => Ok(None),
        }
    }

    async fn previously_cached_resources(&self) -> Result<Vec<String>> {
        match self.latest() {
            Some(latest) => latest.previously_cached_resources().await,
            None => Ok(Vec::new()),
        }
    }

    async fn recent_cache_status(&self, url: &str) -> Result<CacheStatus> {
        match self.latest() {
            Some(latest) => latest.recent_cache_status(url).await,
            None => Ok(CacheStatus::NotCached),
        }
    }
}
