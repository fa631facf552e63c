use crate::manifest::Manifest;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bumped whenever [`PersistedState`] changes shape. A record with any other
/// schema is discarded and the engine boots fresh.
pub const SCHEMA: u32 = 1;
/// Metadata table holding the driver's own state.
pub const CONTROL_TABLE: &str = "control";
pub const STATE_KEY: &str = "state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverState {
    #[display("NORMAL")]
    Normal,
    /// The latest version is broken: clients already pinned to a version keep
    /// being served, new clients aren't.
    #[display("EXISTING_CLIENTS_ONLY")]
    ExistingClientsOnly,
    /// The engine failed to start; nothing is handled until restart.
    #[display("SAFE_MODE")]
    SafeMode,
}

/// Everything needed to rebuild the driver after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub schema: u32,
    /// Manifest hash → manifest.
    pub manifests: BTreeMap<String, Manifest>,
    /// Client id → manifest hash.
    pub assignments: BTreeMap<String, String>,
    pub latest: String,
}
impl PersistedState {
    /// State of a fresh install: one version, no clients.
    pub fn bootstrap(manifest: Manifest, hash: String) -> Self {
        Self {
            schema: SCHEMA,
            manifests: BTreeMap::from([(hash.clone(), manifest)]),
            assignments: BTreeMap::new(),
            latest: hash,
        }
    }
}
