//! Deferred background work.
//!
//! Revalidation, cache cleanup, version initialization and update checks are
//! queued here and run once requests have stopped arriving for a while
//! (debounced by `delay`), but never later than `max_delay` after the oldest
//! task was queued.

use crate::adapter::Clock;
use crate::error::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use stowaway_config::IdleConfig;
use tokio::sync::watch;

struct IdleTask {
    description: String,
    run: BoxFuture<'static, Result<()>>,
}

#[derive(Default)]
struct Queue {
    tasks: VecDeque<IdleTask>,
    oldest_scheduled_at: Option<u64>,
    /// Cancellation flag of the armed debounce timer, if any.
    armed: Option<Arc<AtomicBool>>,
    last_trigger: Option<u64>,
    last_run: Option<u64>,
}

/// Read model for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleSnapshot {
    pub queue: Vec<String>,
    pub last_trigger: Option<u64>,
    pub last_run: Option<u64>,
}

pub struct IdleScheduler {
    clock: Arc<dyn Clock>,
    delay: Duration,
    max_delay: Duration,
    queue: Mutex<Queue>,
    /// Held while draining, so a flush and a timer never run tasks concurrently.
    running: tokio::sync::Mutex<()>,
    empty: watch::Sender<bool>,
}
impl IdleScheduler {
    pub fn new(clock: Arc<dyn Clock>, config: IdleConfig) -> Arc<Self> {
        Arc::new(Self {
            clock,
            delay: config.delay(),
            max_delay: config.max_delay(),
            queue: Mutex::new(Queue::default()),
            running: tokio::sync::Mutex::new(()),
            empty: watch::Sender::new(true),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `task`. Nothing runs until the next [`trigger()`](Self::trigger)
    /// fires or the queue is [flushed](Self::flush).
    pub fn schedule<F>(&self, description: impl Into<String>, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let description = description.into();
        tracing::debug!(task = %description, "Scheduled idle task");
        let mut queue = self.lock();
        queue.oldest_scheduled_at.get_or_insert_with(|| self.clock.now());
        queue.tasks.push_back(IdleTask { description, run: task.boxed() });
        self.empty.send_replace(false);
    }

    /// Note activity and (re)arm the debounce timer.
    pub fn trigger(self: &Arc<Self>) {
        let now = self.clock.now();
        let cancel = Arc::new(AtomicBool::new(false));
        let wait = {
            let mut queue = self.lock();
            queue.last_trigger = Some(now);
            if queue.tasks.is_empty() {
                return;
            }
            if let Some(previous) = queue.armed.replace(Arc::clone(&cancel)) {
                previous.store(true, Ordering::SeqCst);
            }
            let waited = Duration::from_millis(now.saturating_sub(queue.oldest_scheduled_at.unwrap_or(now)));
            self.delay.min(self.max_delay.saturating_sub(waited))
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.clock.sleep(wait).await;
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            {
                let mut queue = this.lock();
                if queue.armed.as_ref().is_some_and(|armed| Arc::ptr_eq(armed, &cancel)) {
                    queue.armed = None;
                }
            }
            this.execute().await;
        });
    }

    /// Cancel any armed timer and drain the queue now.
    pub async fn flush(&self) {
        if let Some(armed) = self.lock().armed.take() {
            armed.store(true, Ordering::SeqCst);
        }
        self.execute().await;
    }

    /// Resolves once the queue has been fully drained.
    pub async fn idle(&self) {
        let mut empty = self.empty.subscribe();
        // The sender lives as long as `self`, so this can't fail.
        let _ = empty.wait_for(|empty| *empty).await;
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    pub fn snapshot(&self) -> IdleSnapshot {
        let queue = self.lock();
        IdleSnapshot {
            queue: queue.tasks.iter().map(|task| task.description.clone()).collect(),
            last_trigger: queue.last_trigger,
            last_run: queue.last_run,
        }
    }

    #[tracing::instrument(skip_all)]
    async fn execute(&self) {
        let _running = self.running.lock().await;
        self.lock().last_run = Some(self.clock.now());
        loop {
            // Tasks queued while a batch runs are picked up by the next pass.
            let batch: Vec<IdleTask> = {
                let mut queue = self.lock();
                if queue.tasks.is_empty() {
                    queue.oldest_scheduled_at = None;
                    // Signalled under the queue lock so a concurrent `schedule` can't be overwritten.
                    self.empty.send_replace(true);
                    break;
                }
                queue.tasks.drain(..).collect()
            };
            for task in batch {
                tracing::debug!(task = %task.description, "Running idle task");
                if let Err(err) = task.run.await {
                    tracing::warn!(task = %task.description, error = ?err, "Idle task failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockClock;
    use std::sync::atomic::AtomicUsize;

    fn scheduler() -> (Arc<MockClock>, Arc<IdleScheduler>) {
        let clock = Arc::new(MockClock::new());
        let idle = IdleScheduler::new(clock.clone(), IdleConfig { delay_ms: 5_000, max_delay_ms: 30_000 });
        (clock, idle)
    }

    fn counting_task(counter: &Arc<AtomicUsize>) -> impl Future<Output = Result<()>> + Send + 'static {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_does_not_run() {
        let (_clock, idle) = scheduler();
        let ran = Arc::new(AtomicUsize::new(0));
        idle.schedule("task", counting_task(&ran));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(idle.snapshot().queue, vec!["task".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_debounces() {
        let (_clock, idle) = scheduler();
        let ran = Arc::new(AtomicUsize::new(0));
        idle.schedule("task", counting_task(&ran));
        idle.trigger();
        tokio::time::sleep(Duration::from_millis(4_000)).await;
        idle.trigger();
        tokio::time::sleep(Duration::from_millis(4_000)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(1_001)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(idle.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_delay_prevents_starvation() {
        let (_clock, idle) = scheduler();
        let ran = Arc::new(AtomicUsize::new(0));
        idle.schedule("task", counting_task(&ran));
        // Keep triggering every 4s: the debounce alone would never fire.
        for _ in 0..7 {
            idle.trigger();
            tokio::time::sleep(Duration::from_millis(4_000)).await;
        }
        // t = 28s
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        idle.trigger();
        tokio::time::sleep(Duration::from_millis(2_001)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_scheduled_during_drain_also_run() {
        let (_clock, idle) = scheduler();
        let ran = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&idle);
        let counter = Arc::clone(&ran);
        idle.schedule("outer", async move {
            inner.schedule("inner", counting_task(&counter));
            Ok(())
        });
        idle.flush().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(idle.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_task_does_not_stop_queue() {
        let (_clock, idle) = scheduler();
        let ran = Arc::new(AtomicUsize::new(0));
        idle.schedule("fails", async { Err(exn::Exn::from(crate::error::ErrorKind::Network)) });
        idle.schedule("succeeds", counting_task(&ran));
        idle.flush().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_waits_for_work_scheduled_after_drain() {
        let (_clock, idle) = scheduler();
        let ran = Arc::new(AtomicUsize::new(0));
        idle.schedule("first", counting_task(&ran));
        idle.flush().await;
        idle.idle().await;
        idle.schedule("second", counting_task(&ran));
        assert!(tokio::time::timeout(Duration::from_secs(60), idle.idle()).await.is_err());
        idle.flush().await;
        assert!(tokio::time::timeout(Duration::from_secs(1), idle.idle()).await.is_ok());
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_schedule_racing_drain_is_never_lost() {
        let (_clock, idle) = scheduler();
        let ran = Arc::new(AtomicUsize::new(0));
        for round in 0..200 {
            idle.schedule("before", counting_task(&ran));
            let scheduler = Arc::clone(&idle);
            let counter = Arc::clone(&ran);
            let racer = tokio::spawn(async move { scheduler.schedule("racing", counting_task(&counter)) });
            idle.flush().await;
            racer.await.unwrap();
            if !idle.is_empty() {
                // The racing task landed after the drain finished.
                let pending = tokio::time::timeout(Duration::from_millis(10), idle.idle()).await;
                assert!(pending.is_err(), "idle resolved with work queued in round {round}");
                idle.flush().await;
            }
            idle.idle().await;
        }
        assert_eq!(ran.load(Ordering::SeqCst), 400);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_resolves_after_drain() {
        let (clock, idle) = scheduler();
        let ran = Arc::new(AtomicUsize::new(0));
        idle.schedule("task", counting_task(&ran));
        idle.trigger();
        idle.idle().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        let snapshot = idle.snapshot();
        assert!(snapshot.queue.is_empty());
        assert_eq!(snapshot.last_run, Some(clock.now()));
        assert!(snapshot.last_trigger.is_some());
    }
}
