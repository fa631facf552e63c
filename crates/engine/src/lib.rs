//! Versioned request cache engine.
//!
//! The engine sits between an application's clients and the network. It
//! serves requests out of caches built from a manifest, installs new
//! manifests in the background, and keeps each client on one consistent
//! version until it is safe to move it.
//!
//! # Architecture
//! - **[`Driver`]**: the top-level state machine. Boots lazily, pins clients
//!   to versions, checks for updates and degrades when versions break.
//! - **[`AppVersion`]**: one installed manifest. Routes a request through its
//!   asset groups, then its data groups, then the navigation fallback.
//! - **Asset groups** ([`assets`]): application files, prefetched or fetched
//!   on demand, optionally pinned to a content hash.
//! - **Data groups** ([`data`]): bounded, LRU-evicted caches for API
//!   responses with a freshness or performance strategy.
//! - **[`IdleScheduler`](idle::IdleScheduler)**: deferred maintenance that
//!   runs once request traffic goes quiet.
//!
//! Everything outside the engine (network, clock, clients, registration) is
//! reached through the traits in [`adapter`].

pub mod adapter;
pub mod assets;
pub mod data;
mod driver;
mod env;
pub mod error;
pub mod idle;
pub mod lru;
pub mod manifest;
pub mod messages;
mod revalidate;
#[cfg(test)]
mod testing;
mod urls;
mod version;

pub use crate::adapter::{Clients, Clock, Network, Registration, SystemClock};
pub use crate::driver::{DebugState, DebugVersion, Driver, DriverState, FetchEvent, PersistedState};
pub use crate::env::Env;
pub use crate::manifest::Manifest;
pub use crate::messages::{Command, Notice, VersionInfo};
pub use crate::urls::UrlResolver;
pub use crate::version::AppVersion;
