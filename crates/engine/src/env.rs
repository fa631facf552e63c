use crate::adapter::{Clients, Clock, Network, Registration};
use crate::error::Result;
use crate::idle::IdleScheduler;
use crate::urls::UrlResolver;
use std::sync::Arc;
use stowaway_config::Config;
use stowaway_storage::{Database, Request, Response, StoreHandle};

/// Everything the engine needs from the outside world, cheap to clone into
/// background tasks.
#[derive(Clone)]
pub struct Env {
    pub config: Arc<Config>,
    pub urls: Arc<UrlResolver>,
    pub store: StoreHandle,
    pub db: Database,
    pub network: Arc<dyn Network>,
    pub clock: Arc<dyn Clock>,
    pub clients: Arc<dyn Clients>,
    pub registration: Arc<dyn Registration>,
    pub idle: Arc<IdleScheduler>,
}
impl Env {
    pub fn new(
        config: Config,
        store: StoreHandle,
        network: Arc<dyn Network>,
        clock: Arc<dyn Clock>,
        clients: Arc<dyn Clients>,
        registration: Arc<dyn Registration>,
    ) -> Result<Self> {
        let urls = UrlResolver::new(&config.scope, config.cache_bust_parameter.clone())?;
        let db = Database::new(Arc::clone(&store), config.cache_prefix.clone());
        let idle = IdleScheduler::new(Arc::clone(&clock), config.idle);
        Ok(Self {
            config: Arc::new(config),
            urls: Arc::new(urls),
            store,
            db,
            network,
            clock,
            clients,
            registration,
            idle,
        })
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Fetch from the network; a connectivity failure becomes a `504`.
    pub async fn safe_fetch(&self, request: &Request) -> Response {
        match self.network.fetch(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(url = %request.url, error = ?err, "Network unreachable, answering 504");
                Response::gateway_timeout()
            },
        }
    }

    /// Name of a cache owned by the engine.
    pub fn cache_name(&self, suffix: &str) -> String {
        format!("{}:{}", self.config.cache_prefix, suffix)
    }

    /// Whether `name` belongs to the engine.
    pub fn owns_cache(&self, name: &str) -> bool {
        name.strip_prefix(&self.config.cache_prefix).is_some_and(|rest| rest.starts_with(':'))
    }
}
