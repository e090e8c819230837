//! Reauthentication scheduler: one timer slot per driver, one worker for all drivers.
//!
//! `set_timer` replaces the driver's slot under the bookkeeping lock, and the worker
//! removes and dispatches due slots under that same lock. So a replaced or cleared
//! callback can never fire, and a driver never has two pending callbacks.
//! There is no built-in periodicity: a callback that wants another round calls
//! `set_timer` again once its work is done.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Identity of one reauthentication driver within a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriverId(u64);

impl std::fmt::Display for DriverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "driver-{}", self.0)
    }
}

/// Work dispatched when a timer fires. Runs on the scheduler worker while the
/// bookkeeping lock is held: it must only hand work off (e.g. `tokio::spawn`),
/// never block, and never call back into the scheduler synchronously.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

struct Slot {
    due: Instant,
    callback: TimerCallback,
}

struct Shared {
    slots: Mutex<HashMap<DriverId, Slot>>,
    wake: Notify,
}

impl Shared {
    fn next_due(&self) -> Option<Instant> {
        self.slots.lock().values().map(|slot| slot.due).min()
    }

    fn fire_due(&self, now: Instant) -> usize {
        let mut slots = self.slots.lock();
        let mut due: Vec<(Instant, DriverId)> = slots
            .iter()
            .filter(|(_, slot)| slot.due <= now)
            .map(|(id, slot)| (slot.due, *id))
            .collect();
        due.sort();
        let fired = due.len();
        for (_, id) in due {
            if let Some(slot) = slots.remove(&id) {
                tracing::trace!(%id, "reauth timer fired");
                (slot.callback)();
            }
        }
        fired
    }
}

pub struct ReauthScheduler {
    shared: Arc<Shared>,
    next_driver: AtomicU64,
    worker: JoinHandle<()>,
}

impl ReauthScheduler {
    /// Start the scheduler worker on the current tokio runtime.
    pub fn new() -> Arc<Self> {
        let shared = Arc::new(Shared {
            slots: Mutex::new(HashMap::new()),
            wake: Notify::new(),
        });
        let worker = tokio::spawn(run_worker(shared.clone()));
        Arc::new(Self {
            shared,
            next_driver: AtomicU64::new(1),
            worker,
        })
    }

    /// Allocate a fresh driver identity.
    pub fn register_driver(&self) -> DriverId {
        DriverId(self.next_driver.fetch_add(1, Ordering::Relaxed))
    }

    /// Replace any pending callback for `driver` with `callback`, due after `delay`.
    pub fn set_timer(&self, driver: DriverId, delay: Duration, callback: TimerCallback) {
        let due = Instant::now() + delay;
        let replaced = self
            .shared
            .slots
            .lock()
            .insert(driver, Slot { due, callback })
            .is_some();
        tracing::trace!(%driver, ?delay, replaced, "reauth timer set");
        self.shared.wake.notify_one();
    }

    /// Remove the pending callback for `driver`. Returns false (and does nothing) when none was pending.
    pub fn clear_timer(&self, driver: DriverId) -> bool {
        let cleared = self.shared.slots.lock().remove(&driver).is_some();
        if cleared {
            tracing::trace!(%driver, "reauth timer cleared");
            self.shared.wake.notify_one();
        }
        cleared
    }

    pub fn is_pending(&self, driver: DriverId) -> bool {
        self.shared.slots.lock().contains_key(&driver)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.slots.lock().len()
    }
}

impl Drop for ReauthScheduler {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(shared: Arc<Shared>) {
    loop {
        match shared.next_due() {
            Some(due) => {
                tokio::select! {
                    _ = time::sleep_until(due) => {}
                    _ = shared.wake.notified() => continue,
                }
            }
            None => {
                shared.wake.notified().await;
                continue;
            }
        }
        shared.fire_due(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> TimerCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let make = move || -> TimerCallback {
            let c = c.clone();
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
        };
        (count, make)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_no_earlier_than_delay() {
        let scheduler = ReauthScheduler::new();
        let driver = scheduler.register_driver();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let start = Instant::now();
        scheduler.set_timer(
            driver,
            Duration::from_millis(500),
            Box::new(move || {
                let _ = tx.send(Instant::now());
            }),
        );
        let fired_at = rx.await.unwrap();
        assert!(fired_at - start >= Duration::from_millis(500));
        assert!(!scheduler.is_pending(driver));
    }

    #[tokio::test(start_paused = true)]
    async fn set_timer_replaces_pending_callback() {
        let scheduler = ReauthScheduler::new();
        let driver = scheduler.register_driver();
        let (first, make_first) = counter();
        let (second, make_second) = counter();

        scheduler.set_timer(driver, Duration::from_millis(100), make_first());
        scheduler.set_timer(driver, Duration::from_millis(300), make_second());
        assert_eq!(scheduler.pending_count(), 1);

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_timer_never_fires() {
        let scheduler = ReauthScheduler::new();
        let driver = scheduler.register_driver();
        let (count, make) = counter();
        scheduler.set_timer(driver, Duration::from_millis(100), make());
        assert!(scheduler.clear_timer(driver));
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_without_pending_is_noop() {
        let scheduler = ReauthScheduler::new();
        let driver = scheduler.register_driver();
        assert!(!scheduler.clear_timer(driver));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drivers_are_independent() {
        let scheduler = ReauthScheduler::new();
        let a = scheduler.register_driver();
        let b = scheduler.register_driver();
        let (count_a, make_a) = counter();
        let (count_b, make_b) = counter();
        scheduler.set_timer(a, Duration::from_millis(100), make_a());
        scheduler.set_timer(b, Duration::from_millis(200), make_b());
        scheduler.clear_timer(a);
        time::sleep(Duration::from_millis(300)).await;
        assert_eq!(count_a.load(Ordering::SeqCst), 0);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_timer_set_later_wakes_worker() {
        let scheduler = ReauthScheduler::new();
        let slow = scheduler.register_driver();
        let fast = scheduler.register_driver();
        let (count_fast, make_fast) = counter();
        let (_, make_slow) = counter();
        scheduler.set_timer(slow, Duration::from_secs(60), make_slow());
        tokio::task::yield_now().await;
        scheduler.set_timer(fast, Duration::from_millis(10), make_fast());
        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count_fast.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_pending(slow));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_from_spawned_work() {
        let scheduler = ReauthScheduler::new();
        let driver = scheduler.register_driver();
        let (count, make) = counter();
        let sched = scheduler.clone();
        scheduler.set_timer(
            driver,
            Duration::from_millis(50),
            Box::new(move || {
                make()();
                tokio::spawn(async move {
                    sched.set_timer(driver, Duration::from_millis(50), make());
                });
            }),
        );
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(!scheduler.is_pending(driver));
    }
}
