//! Layered configuration for stowaway.
//!
//! Sources, lowest priority first:
//! 1. built-in defaults ([`Config::default()`]),
//! 2. an optional file (TOML, YAML or JSON, chosen by extension),
//! 3. environment variables prefixed `STOWAWAY_`, with nested keys split on
//!    `__` (`STOWAWAY_IDLE__DELAY_MS=1000`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "STOWAWAY_";
const CONFIG_FILE: &str = "config.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "stowaway")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registration scope. Navigation rules and the manifest URL are relative
    /// to it.
    pub scope: String,
    pub manifest_url: String,
    /// Prefix of every cache and metadata table the engine owns. Cleanup
    /// never touches caches outside it.
    pub cache_prefix: String,
    pub supported_config_version: u32,
    pub redirect_limit: u32,
    pub idle: IdleConfig,
    pub bypass_parameter: String,
    pub cache_bust_parameter: String,
    pub storage: StorageConfig,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            scope: "http://localhost/".to_string(),
            manifest_url: "/stowaway.json".to_string(),
            cache_prefix: "stowaway".to_string(),
            supported_config_version: 1,
            redirect_limit: 3,
            idle: IdleConfig::default(),
            bypass_parameter: "stowaway-bypass".to_string(),
            cache_bust_parameter: "stowaway-cache-bust".to_string(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Debounce window after the last request before deferred work runs.
    pub delay_ms: u64,
    /// Upper bound on how long the oldest deferred task may wait.
    pub max_delay_ms: u64,
}
impl Default for IdleConfig {
    fn default() -> Self {
        Self { delay_ms: 5_000, max_delay_ms: 30_000 }
    }
}
impl IdleConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}
impl Default for StorageConfig {
    fn default() -> Self {
        let root = project_dirs()
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("stowaway"));
        Self { root }
    }
}

impl Config {
    /// Platform configuration file location (`config.toml` in the project's
    /// config directory), if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Defaults, then `file` (if any), then the environment.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load from the default file location (when it exists) and the environment.
    pub fn load() -> Result<Self> {
        let file = Self::default_path().filter(|path| path.is_file());
        tracing::debug!(file = ?file, "Loading configuration");
        Self::from_figment(Self::figment(file.as_deref())?)
    }

    /// Load from an explicit file, which must exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        tracing::debug!(file = %path.display(), "Loading configuration");
        Self::from_figment(Self::figment(Some(path))?)
    }

    /// Extract and validate.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_prefix.is_empty() || self.cache_prefix.contains(':') {
            exn::bail!(ErrorKind::Invalid(format!(
                "cache_prefix {:?} must be non-empty and must not contain ':'",
                self.cache_prefix
            )));
        }
        if !self.scope.ends_with('/') {
            exn::bail!(ErrorKind::Invalid(format!("scope {:?} must end with '/'", self.scope)));
        }
        if !self.manifest_url.starts_with('/') {
            exn::bail!(ErrorKind::Invalid(format!("manifest_url {:?} must start with '/'", self.manifest_url)));
        }
        if self.idle.max_delay_ms < self.idle.delay_ms {
            exn::bail!(ErrorKind::Invalid(format!(
                "idle.max_delay_ms ({}) is shorter than idle.delay_ms ({})",
                self.idle.max_delay_ms, self.idle.delay_ms
            )));
        }
        if self.bypass_parameter.is_empty() || self.cache_bust_parameter.is_empty() {
            exn::bail!(ErrorKind::Invalid("request parameter names must not be empty".to_string()));
        }
        Ok(())
    }
}
