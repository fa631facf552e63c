//! Scripted collaborators for engine tests.

use crate::adapter::{Clients, Clock, Network, Registration};
use crate::env::Env;
use crate::error::{ErrorKind, Result};
use crate::messages::Notice;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stowaway_config::Config;
use stowaway_storage::backend::MemoryStore;
use stowaway_storage::{Request, Response, StoreHandle};
use url::Url;

pub const SCOPE: &str = "http://localhost/";
/// 2023-11-14T22:13:20Z
pub const START: u64 = 1_700_000_000_000;

#[derive(Clone)]
struct Route {
    response: Response,
    delay: Option<Duration>,
}

/// Network double answering from a table of scripted responses.
///
/// Routes are keyed by absolute URL with the cache-busting parameter
/// stripped; a route registered with [`reply_busted()`](Self::reply_busted)
/// only answers cache-busted requests. Anything unscripted is a `404`.
pub struct MockNetwork {
    bust_parameter: String,
    routes: Mutex<HashMap<(String, bool), Route>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
}
impl MockNetwork {
    pub fn new() -> Self {
        Self {
            bust_parameter: Config::default().cache_bust_parameter,
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
        }
    }

    fn absolute(url: &str) -> String {
        Url::parse(SCOPE).and_then(|scope| scope.join(url)).map(|url| url.to_string()).unwrap_or_else(|_| url.to_string())
    }

    /// `(url without the bust parameter, was it busted)`
    fn route_key(&self, url: &str) -> (String, bool) {
        let Ok(mut parsed) = Url::parse(&Self::absolute(url)) else {
            return (url.to_string(), false);
        };
        let pairs: Vec<(String, String)> = parsed.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        let busted = pairs.iter().any(|(k, _)| k == &self.bust_parameter);
        let kept: Vec<&(String, String)> = pairs.iter().filter(|(k, _)| k != &self.bust_parameter).collect();
        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        (parsed.to_string(), busted)
    }

    fn insert(&self, url: &str, busted: bool, route: Route) {
        self.routes.lock().unwrap().insert((Self::absolute(url), busted), route);
    }

    pub fn reply(&self, url: &str, response: Response) {
        self.insert(url, false, Route { response, delay: None });
    }

    pub fn reply_busted(&self, url: &str, response: Response) {
        self.insert(url, true, Route { response, delay: None });
    }

    pub fn reply_after(&self, url: &str, delay: Duration, response: Response) {
        self.insert(url, false, Route { response, delay: Some(delay) });
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Requests made for `url`, busted or not.
    pub fn calls_to(&self, url: &str) -> usize {
        let target = Self::absolute(url);
        self.calls.lock().unwrap().iter().filter(|call| self.route_key(call).0 == target).count()
    }

    /// Cache-busted requests made for `url`.
    pub fn busted_calls_to(&self, url: &str) -> usize {
        let target = (Self::absolute(url), true);
        self.calls.lock().unwrap().iter().filter(|call| self.route_key(call) == target).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.calls.lock().unwrap().push(request.url.clone());
        if self.offline.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Network);
        }
        let (url, busted) = self.route_key(&request.url);
        let route = {
            let routes = self.routes.lock().unwrap();
            routes.get(&(url.clone(), busted)).or_else(|| routes.get(&(url, false))).cloned()
        };
        let Some(route) = route else {
            return Ok(Response::new(404, Vec::new()).with_status_text("Not Found"));
        };
        if let Some(delay) = route.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(route.response)
    }
}

/// Clock following tokio's (pausable) timer, plus a manual offset.
pub struct MockClock {
    origin: tokio::time::Instant,
    offset: AtomicU64,
}
impl MockClock {
    pub fn new() -> Self {
        Self { origin: tokio::time::Instant::now(), offset: AtomicU64::new(0) }
    }

    /// Move `now()` forward without waking any timer.
    pub fn advance(&self, by: Duration) {
        self.offset.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> u64 {
        START + self.origin.elapsed().as_millis() as u64 + self.offset.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Default)]
pub struct MockClients {
    live: Mutex<Vec<String>>,
    messages: Mutex<Vec<(String, Notice)>>,
}
impl MockClients {
    pub fn connect(&self, client_id: &str) {
        let mut live = self.live.lock().unwrap();
        if !live.iter().any(|id| id == client_id) {
            live.push(client_id.to_string());
        }
    }

    pub fn disconnect(&self, client_id: &str) {
        self.live.lock().unwrap().retain(|id| id != client_id);
    }

    pub fn messages(&self) -> Vec<(String, Notice)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn messages_for(&self, client_id: &str) -> Vec<Notice> {
        self.messages().into_iter().filter(|(id, _)| id == client_id).map(|(_, notice)| notice).collect()
    }
}

#[async_trait]
impl Clients for MockClients {
    async fn live(&self) -> Vec<String> {
        self.live.lock().unwrap().clone()
    }

    async fn post_message(&self, client_id: &str, notice: &Notice) {
        self.messages.lock().unwrap().push((client_id.to_string(), notice.clone()));
    }
}

#[derive(Default)]
pub struct MockRegistration {
    unregistered: AtomicBool,
}
impl MockRegistration {
    pub fn unregistered(&self) -> bool {
        self.unregistered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Registration for MockRegistration {
    async fn unregister(&self) -> Result<()> {
        self.unregistered.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// An [`Env`] wired to test doubles, with handles kept for assertions.
pub struct Harness {
    pub env: Env,
    pub store: Arc<MemoryStore>,
    pub network: Arc<MockNetwork>,
    pub clock: Arc<MockClock>,
    pub clients: Arc<MockClients>,
    pub registration: Arc<MockRegistration>,
}
impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::default()))
    }

    /// A fresh engine environment on top of an existing store, as after a
    /// process restart.
    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        let network = Arc::new(MockNetwork::new());
        let clock = Arc::new(MockClock::new());
        let clients = Arc::new(MockClients::default());
        let registration = Arc::new(MockRegistration::default());
        let env = Env::new(
            Config::default(),
            Arc::clone(&store) as StoreHandle,
            network.clone(),
            clock.clone(),
            clients.clone(),
            registration.clone(),
        )
        .unwrap();
        Self { env, store, network, clock, clients, registration }
    }
}
