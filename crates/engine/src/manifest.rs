//! The manifest: one immutable description of an application version.
//!
//! Only the fields the engine reads are modelled. A manifest is identified
//! by the hash of its canonical JSON form, so re-serializing (or the server
//! re-ordering keys) doesn't look like a new version.

use crate::adapter::content_hash;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub config_version: u32,
    #[serde(default)]
    pub timestamp: u64,
    pub index: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_data: Option<Value>,
    #[serde(default)]
    pub asset_groups: Vec<AssetGroupConfig>,
    #[serde(default)]
    pub data_groups: Vec<DataGroupConfig>,
    /// URL → content hash, for hash-pinned asset URLs only.
    #[serde(default)]
    pub hash_table: BTreeMap<String, String>,
    #[serde(default = "default_navigation_urls")]
    pub navigation_urls: Vec<NavigationUrl>,
    #[serde(default)]
    pub navigation_request_strategy: NavigationStrategy,
}
impl Manifest {
    /// Parse a manifest and compute its hash.
    pub fn parse(bytes: &[u8]) -> Result<(Self, String)> {
        let value: Value = serde_json::from_slice(bytes).or_raise(|| ErrorKind::InvalidManifest)?;
        let hash = manifest_hash(&value)?;
        let manifest = serde_json::from_value(value).or_raise(|| ErrorKind::InvalidManifest)?;
        Ok((manifest, hash))
    }
}

/// Hash of the canonical (sorted-key, compact) JSON form of a manifest.
pub fn manifest_hash(value: &Value) -> Result<String> {
    let canonical = serde_json::to_vec(value).or_raise(|| ErrorKind::InvalidManifest)?;
    Ok(content_hash(&canonical))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    Prefetch,
    Lazy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetGroupConfig {
    pub name: String,
    pub install_mode: InstallMode,
    /// How the group behaves when a newer version is installed. Defaults to
    /// the install mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_mode: Option<InstallMode>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}
impl AssetGroupConfig {
    pub fn update_mode(&self) -> InstallMode {
        self.update_mode.unwrap_or(self.install_mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Network first, cache when the network is slow or gone.
    Freshness,
    /// Cache first, network when missing or stale.
    Performance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataGroupConfig {
    pub name: String,
    /// Bumping this starts the group over with an empty cache.
    #[serde(default = "default_data_version")]
    pub version: u32,
    pub strategy: Strategy,
    #[serde(default)]
    pub patterns: Vec<String>,
    pub max_size: usize,
    /// Milliseconds.
    pub max_age: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_ahead_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_opaque_responses: Option<bool>,
}
impl DataGroupConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

fn default_data_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationUrl {
    /// `true` for include rules, `false` for exclude rules.
    pub positive: bool,
    pub regex: String,
}

/// Used when a manifest has no navigation rules: everything under the scope
/// except paths that look like files (a dot in the last segment) or contain
/// `__` segments.
pub fn default_navigation_urls() -> Vec<NavigationUrl> {
    [
        (true, r"^\/.*$"),
        (false, r"^\/(?:.+\/)?[^/]*\.[^/]*$"),
        (false, r"^\/(?:.+\/)?[^/]*__[^/]*$"),
        (false, r"^\/(?:.+\/)?[^/]*__[^/]*\/.*$"),
    ]
    .into_iter()
    .map(|(positive, regex)| NavigationUrl { positive, regex: regex.to_string() })
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationStrategy {
    /// Serve the cached index for every navigation.
    #[default]
    Performance,
    /// Try the network first, fall back to the index when offline.
    Freshness,
}
