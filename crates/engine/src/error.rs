//! Engine Error Types
//!
//! Soft failures (the network is down, a best-effort write didn't stick)
//! never show up here: they turn into `504` responses or a log line where
//! they happen. What's left is what the [`Driver`](crate::Driver) has to act
//! on: a version that broke an invariant ([`Critical`](ErrorKind::Critical)),
//! a version whose manifest can no longer be honoured
//! ([`Unrecoverable`](ErrorKind::Unrecoverable)), or the engine failing to
//! start at all ([`Boot`](ErrorKind::Boot)).

use derive_more::{Display, Error};

/// An engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// `Clone` because a single in-flight asset fetch can be awaited by many
/// callers, each of which gets its own copy of the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ErrorKind {
    /// A version violated an invariant while serving; it must stop being used.
    #[display("critical: {_0}")]
    Critical(#[error(not(source))] String),
    /// The server no longer serves the bytes a version's manifest promised.
    #[display("unrecoverable state: {_0}")]
    Unrecoverable(#[error(not(source))] String),
    /// Cache store or metadata table failure.
    #[display("cache storage failure")]
    Storage,
    /// The network could not be reached.
    #[display("network failure")]
    Network,
    /// The server answered, but not with something usable.
    #[display("unexpected status {status} for {url}")]
    BadResponse { url: String, status: u16 },
    #[display("manifest fetch failed with status {_0}")]
    ManifestFetch(#[error(not(source))] u16),
    #[display("invalid manifest")]
    InvalidManifest,
    #[display("unsupported manifest configVersion {actual} (expected {expected})")]
    ConfigVersion { expected: u32, actual: u32 },
    #[display("unknown version {_0}")]
    UnknownVersion(#[error(not(source))] String),
    /// The driver could not initialize; the engine is in safe mode.
    #[display("initialization failed")]
    Boot,
    /// A new version could not be installed.
    #[display("version installation failed")]
    Install,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Network | Self::ManifestFetch(_))
    }

    /// The version that raised this must be marked as failed.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical(_) | Self::Unrecoverable(_))
    }

    /// Clients pinned to the version that raised this can't trust their cache.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable(_))
    }
}
