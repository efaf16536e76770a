// ============================================
// File: crates/fleetlink-server/src/services/scheduler.rs
// ============================================
//! # Periodic Action Scheduler
//!
//! ## Creation Reason
//! Thousands of devices each need several recurring polls. One timer per
//! (device, task) does not scale; this runs them all off a single heap
//! and a single timer.
//!
//! ## Main Functionality
//! - `schedule`: Register a recurring action, first run immediately
//! - `stop`: Drop all actions of one device
//! - `destroy`: Stop the timer and refuse further work
//!
//! ## Scheduling Model
//! ```text
//!   heap: (due, action_id) ──timer fires──► drain due ≤ now+tolerance
//!     ▲                                          │
//!     │                                     ready queue
//!     │                                          │
//!     └── due = now + interval(device, name) ◄── run (≤ concurrency)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Removed actions leave stale heap entries; they are skipped on pop
//! - The timer is re-armed only when a new entry is due more than
//!   `rearm_threshold` before the armed deadline, so an entry can fire up
//!   to that much late
//! - Actions have no timeout: a hung action holds a concurrency slot
//!   forever
//! - Uses `tokio::time::Instant` so paused-time tests work
//!
//! ## Last Modified
//! v0.1.0 - Initial heap scheduler

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use fleetlink_common::DeviceId;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Notify, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::config::SchedulerConfig;
use crate::error::{Result, ServerError};
use crate::services::event_queue::panic_message;
use crate::services::settings::IntervalProvider;

// ============================================
// Types
// ============================================

/// Identifier of a scheduled action.
pub type ActionId = u64;

type Action = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct ActionEntry {
    device_id: DeviceId,
    interval: String,
    action: Action,
}

#[derive(Default)]
struct SchedulerState {
    heap: BinaryHeap<Reverse<(Instant, ActionId)>>,
    actions: HashMap<ActionId, ActionEntry>,
    by_device: HashMap<DeviceId, HashSet<ActionId>>,
    armed: Option<Instant>,
}

// ============================================
// PeriodicScheduler
// ============================================

/// Single-timer recurring action runner.
pub struct PeriodicScheduler {
    config: SchedulerConfig,
    intervals: Arc<dyn IntervalProvider>,
    state: Mutex<SchedulerState>,
    next_id: AtomicU64,
    ready_tx: mpsc::UnboundedSender<ActionId>,
    wake: Notify,
    permits: Arc<Semaphore>,
    destroyed: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl PeriodicScheduler {
    /// Creates the scheduler and spawns its timer and dispatcher tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: SchedulerConfig, intervals: Arc<dyn IntervalProvider>) -> Arc<Self> {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let permits = Arc::new(Semaphore::new(config.concurrency));

        let scheduler = Arc::new(Self {
            config,
            intervals,
            state: Mutex::new(SchedulerState::default()),
            next_id: AtomicU64::new(1),
            ready_tx,
            wake: Notify::new(),
            permits,
            destroyed: AtomicBool::new(false),
            shutdown_tx,
        });

        tokio::spawn(Arc::clone(&scheduler).timer_loop());
        tokio::spawn(Arc::clone(&scheduler).dispatch_loop(ready_rx));

        info!(
            concurrency = scheduler.config.concurrency,
            tolerance_ms = scheduler.config.tolerance_ms,
            "Periodic scheduler started"
        );
        scheduler
    }

    /// Schedules a recurring action for a device.
    ///
    /// The first run happens immediately; each later run is due
    /// `interval(device, interval_name)` after the previous one finished.
    ///
    /// # Errors
    /// `ShuttingDown` after `destroy`.
    pub fn schedule<F, Fut>(&self, device_id: &DeviceId, interval_name: &str, action: F) -> Result<ActionId>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ServerError::ShuttingDown);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let action: Action = Arc::new(move || action().boxed());

        {
            let mut state = self.state.lock();
            state.actions.insert(
                id,
                ActionEntry {
                    device_id: device_id.clone(),
                    interval: interval_name.to_string(),
                    action,
                },
            );
            state.by_device.entry(device_id.clone()).or_default().insert(id);
        }

        debug!(device_id = %device_id, action_id = id, interval = interval_name, "Action scheduled");
        let _ = self.ready_tx.send(id);
        Ok(id)
    }

    /// Removes every action of a device.
    ///
    /// Already-due and running actions are not invoked again.
    pub fn stop(&self, device_id: &DeviceId) -> usize {
        let mut state = self.state.lock();
        let Some(ids) = state.by_device.remove(device_id) else {
            return 0;
        };
        for id in &ids {
            state.actions.remove(id);
        }
        debug!(device_id = %device_id, removed = ids.len(), "Actions stopped");
        ids.len()
    }

    /// Stops the timer and drops every action. Irreversible.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock();
            *state = SchedulerState::default();
        }
        let _ = self.shutdown_tx.send(());
        self.wake.notify_one();
        info!("Periodic scheduler destroyed");
    }

    /// Number of live actions.
    #[must_use]
    pub fn action_count(&self) -> usize {
        self.state.lock().actions.len()
    }

    /// Returns `true` after `destroy`.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    // ========================================
    // Internals
    // ========================================

    /// Inserts a heap entry and re-arms the timer if it is meaningfully
    /// earlier than the armed deadline.
    fn enqueue(&self, id: ActionId, due: Instant) {
        let mut state = self.state.lock();
        if !state.actions.contains_key(&id) {
            return;
        }
        state.heap.push(Reverse((due, id)));

        let rearm = match state.armed {
            None => true,
            Some(armed) => due + self.config.rearm_threshold() < armed,
        };
        if rearm {
            state.armed = Some(due);
            drop(state);
            self.wake.notify_one();
        }
    }

    /// Pops every live entry due within the tolerance window.
    fn drain_due(&self, now: Instant) -> Vec<ActionId> {
        let horizon = now + self.config.tolerance();
        let mut state = self.state.lock();
        let mut due = Vec::new();

        while let Some(Reverse((at, id))) = state.heap.peek().copied() {
            if at > horizon {
                break;
            }
            state.heap.pop();
            if state.actions.contains_key(&id) {
                due.push(id);
            } else {
                trace!(action_id = id, "Skipping stale heap entry");
            }
        }

        state.armed = state.heap.peek().map(|Reverse((at, _))| *at);
        due
    }

    async fn timer_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.destroyed.load(Ordering::SeqCst) {
                break;
            }
            let deadline = self.state.lock().armed;
            let sleep = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                () = self.wake.notified() => {}
                () = sleep => {
                    for id in self.drain_due(Instant::now()) {
                        let _ = self.ready_tx.send(id);
                    }
                }
            }
        }

        debug!("Scheduler timer exiting");
    }

    async fn dispatch_loop(self: Arc<Self>, mut ready_rx: mpsc::UnboundedReceiver<ActionId>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            let id = tokio::select! {
                _ = shutdown_rx.recv() => break,
                id = ready_rx.recv() => match id {
                    Some(id) => id,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = shutdown_rx.recv() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some((device_id, interval, action)) = self
                .state
                .lock()
                .actions
                .get(&id)
                .map(|e| (e.device_id.clone(), e.interval.clone(), Arc::clone(&e.action)))
            else {
                continue;
            };

            let scheduler = Arc::clone(&self);
            tokio::spawn(async move {
                let _permit = permit;
                match AssertUnwindSafe(async move { action().await }).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(
                        device_id = %device_id,
                        action_id = id,
                        interval = %interval,
                        error = %e,
                        "Periodic action failed"
                    ),
                    Err(panic) => error!(
                        device_id = %device_id,
                        action_id = id,
                        interval = %interval,
                        panic = panic_message(panic.as_ref()),
                        "Periodic action panicked"
                    ),
                }

                let delay = scheduler.intervals.interval(&device_id, &interval).await;
                scheduler.enqueue(id, Instant::now() + delay);
            });
        }

        debug!("Scheduler dispatcher exiting");
    }
}

impl fmt::Debug for PeriodicScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PeriodicScheduler")
            .field("actions", &state.actions.len())
            .field("devices", &state.by_device.len())
            .field("heap", &state.heap.len())
            .field("armed", &state.armed)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    struct Fixed(Duration);

    #[async_trait]
    impl IntervalProvider for Fixed {
        async fn interval(&self, _device: &DeviceId, _name: &str) -> Duration {
            self.0
        }
    }

    fn scheduler(interval_ms: u64) -> Arc<PeriodicScheduler> {
        PeriodicScheduler::start(
            SchedulerConfig::default(),
            Arc::new(Fixed(Duration::from_millis(interval_ms))),
        )
    }

    fn counter_action(counter: &Arc<AtomicUsize>) -> impl Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync {
        let counter = Arc::clone(counter);
        move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invocation_count_matches_interval() {
        let scheduler = scheduler(1000);
        let count = Arc::new(AtomicUsize::new(0));
        let device = DeviceId::new("dev1");

        scheduler.schedule(&device, "ping", counter_action(&count)).unwrap();
        tokio::time::sleep(Duration::from_millis(5_500)).await;

        // Runs at 0, 1, 2, 3, 4, 5 seconds
        let n = count.load(Ordering::SeqCst);
        assert!((5..=7).contains(&n), "got {n} invocations");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_runs() {
        let scheduler = scheduler(1000);
        let count = Arc::new(AtomicUsize::new(0));
        let device = DeviceId::new("dev1");

        scheduler.schedule(&device, "ping", counter_action(&count)).unwrap();
        scheduler.schedule(&device, "stats", counter_action(&count)).unwrap();
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        assert_eq!(scheduler.stop(&device), 2);
        let before = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(count.load(Ordering::SeqCst), before);
        assert_eq!(scheduler.action_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_only_affects_one_device() {
        let scheduler = scheduler(1000);
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(&DeviceId::new("a"), "ping", counter_action(&a)).unwrap();
        scheduler.schedule(&DeviceId::new("b"), "ping", counter_action(&b)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop(&DeviceId::new("a"));

        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert!(b.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_action_is_rescheduled() {
        let scheduler = scheduler(1000);
        let count = Arc::new(AtomicUsize::new(0));
        let device = DeviceId::new("dev1");

        let runs = Arc::clone(&count);
        scheduler
            .schedule(&device, "ping", move || {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("device unreachable"))
                }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_action_is_rescheduled() {
        let scheduler = scheduler(1000);
        let count = Arc::new(AtomicUsize::new(0));
        let device = DeviceId::new("dev1");

        let runs = Arc::clone(&count);
        scheduler
            .schedule(&device, "ping", move || {
                let runs = Arc::clone(&runs);
                async move {
                    if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("action bug");
                    }
                    anyhow::Ok(())
                }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        let runs = count.load(Ordering::SeqCst);
        assert!((5..=7).contains(&runs), "runs = {runs}");
        assert_eq!(scheduler.action_count(), 1);
        scheduler.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let scheduler = PeriodicScheduler::start(
            SchedulerConfig {
                concurrency: 2,
                ..SchedulerConfig::default()
            },
            Arc::new(Fixed(Duration::from_secs(60))),
        );
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            scheduler
                .schedule(&DeviceId::new(format!("dev{i}")), "slow", move || {
                    let running = Arc::clone(&running);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        anyhow::Ok(())
                    }
                })
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_rejects_new_work() {
        let scheduler = scheduler(1000);
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.schedule(&DeviceId::new("dev1"), "ping", counter_action(&count)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        scheduler.destroy();
        let before = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(count.load(Ordering::SeqCst), before);
        assert!(matches!(
            scheduler.schedule(&DeviceId::new("dev2"), "ping", counter_action(&count)),
            Err(ServerError::ShuttingDown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_only_for_meaningfully_earlier_entries() {
        let scheduler = scheduler(60_000);
        let device = DeviceId::new("dev1");
        scheduler.schedule(&device, "ping", || async { anyhow::Ok(()) }).unwrap();
        scheduler.schedule(&device, "stats", || async { anyhow::Ok(()) }).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let armed = scheduler.state.lock().armed.unwrap();
        let (first, second) = {
            let state = scheduler.state.lock();
            let mut ids: Vec<_> = state.actions.keys().copied().collect();
            ids.sort_unstable();
            (ids[0], ids[1])
        };

        scheduler.enqueue(first, armed - Duration::from_millis(500));
        assert_eq!(scheduler.state.lock().armed, Some(armed));

        scheduler.enqueue(second, armed - Duration::from_secs(5));
        assert_eq!(scheduler.state.lock().armed, Some(armed - Duration::from_secs(5)));
    }
}
