//! Collaborators the engine talks to but doesn't implement.
//!
//! The host (a proxy, an embedded webview, a test) provides these. They are
//! trait objects so that one [`Env`](crate::Env) can be cloned into every
//! background task.

use crate::error::Result;
use crate::messages::Notice;
use async_trait::async_trait;
use std::time::Duration;
use stowaway_storage::{Request, Response};
use time::OffsetDateTime;

/// The network fetch primitive.
///
/// An `Err` means the network could not be reached at all. Any answer from
/// a server, including `404` or `500`, is an `Ok` response.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

#[async_trait]
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now(&self) -> u64;

    async fn sleep(&self, duration: Duration);
}

/// The application clients (pages, tabs, workers) being served.
#[async_trait]
pub trait Clients: Send + Sync {
    /// Ids of every client that currently exists.
    async fn live(&self) -> Vec<String>;

    /// Deliver `notice` to one client. Delivery is best-effort; a client that
    /// went away in the meantime simply doesn't receive it.
    async fn post_message(&self, client_id: &str, notice: &Notice);

    async fn is_live(&self, client_id: &str) -> bool {
        self.live().await.iter().any(|id| id == client_id)
    }
}

/// The host's registration of this engine.
#[async_trait]
pub trait Registration: Send + Sync {
    /// Stop routing requests through the engine at all.
    async fn unregister(&self) -> Result<()>;
}

/// Wall clock backed by the system time and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> u64 {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        u64::try_from(millis).unwrap_or(0)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Content hash used for manifests and hash-pinned resources (BLAKE3, hex).
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
