use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A pending operation that any number of callers can await.
pub type Pending<T> = Shared<BoxFuture<'static, T>>;

/// Keyed table of in-flight operations.
///
/// At most one operation per key is in flight at any time. A second caller
/// asking for the same key gets a handle to the first caller's operation and
/// observes the same (cloned) output. Entries are removed once a caller has
/// observed the result, or replaced when they're found already resolved (in
/// case every caller gave up before settling).
///
/// ```
/// use stowaway_asyncutils::Coalescer;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let table: Coalescer<&str, u32> = Coalescer::default();
/// let (a, b) = tokio::join!(
///     table.run("key", || async { 1 }),
///     table.run("key", || async { 2 }),
/// );
/// assert_eq!((a, b), (1, 1));
/// # }
/// ```
pub struct Coalescer<K, T> {
    inflight: Mutex<HashMap<K, Pending<T>>>,
}
impl<K, T> Default for Coalescer<K, T> {
    fn default() -> Self {
        Self { inflight: Mutex::new(HashMap::new()) }
    }
}

impl<K, T> Coalescer<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding this lock can only come from HashMap internals;
    // the map is still structurally fine afterwards.
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Pending<T>>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the operation in flight for `key`, calling `start` to create
    /// one if there isn't any.
    ///
    /// `start` is only invoked when no unresolved operation exists for `key`.
    pub fn join<F, Fut>(&self, key: K, start: F) -> Pending<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut inflight = self.lock();
        if let Some(pending) = inflight.get(&key)
            && pending.peek().is_none()
        {
            return pending.clone();
        }
        let pending = start().boxed().shared();
        inflight.insert(key, pending.clone());
        pending
    }

    /// Forget `pending` if it's still the entry registered for `key`.
    pub fn settle(&self, key: &K, pending: &Pending<T>) {
        let mut inflight = self.lock();
        if inflight.get(key).is_some_and(|current| Shared::ptr_eq(current, pending)) {
            inflight.remove(key);
        }
    }

    /// Join (or start) the operation for `key`, await it, and settle it.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let pending = self.join(key.clone(), start);
        let output = pending.clone().await;
        self.settle(&key, &pending);
        output
    }

    /// Whether an operation for `key` is currently registered.
    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
