//! # Wait Strategies
//!
//! Pluggable policies a consumer thread uses to wait for the next published
//! sequence. Strategy choice trades latency against CPU burn and never
//! affects correctness: every strategy observes the same cursor with the
//! same acquire ordering and honors the same alert protocol.
//!
//! - [`BusySpinWaitStrategy`] — lowest latency, one core pinned per consumer
//! - [`YieldingWaitStrategy`] — spins briefly, then yields its timeslice
//! - [`BlockingWaitStrategy`] — parks on a condvar; producers signal on publish

use std::fmt;
use std::hint;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::constants::system::SPIN_YIELD_THRESHOLD;

/// What a consumer observed while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The cursor reached at least the requested sequence; the value is the
    /// highest sequence observed as available.
    Available(i64),
    /// The alert flag was raised (shutdown); the consumer must re-check its
    /// exit condition instead of blocking again.
    Alerted,
}

/// Policy for waiting on sequence availability.
pub trait WaitStrategy: Send + Sync + fmt::Debug {
    /// Block the calling thread until `cursor >= sequence` or the alert flag
    /// is raised.
    fn wait_for(&self, sequence: i64, cursor: &AtomicI64, alerted: &AtomicBool) -> WaitOutcome;

    /// Wake any thread blocked in [`WaitStrategy::wait_for`]. Called by
    /// producers after publishing and by shutdown after raising the alert.
    fn signal(&self);
}

/// Busy-spin: never sleeps, never yields.
#[derive(Debug, Default)]
pub struct BusySpinWaitStrategy;

impl WaitStrategy for BusySpinWaitStrategy {
    fn wait_for(&self, sequence: i64, cursor: &AtomicI64, alerted: &AtomicBool) -> WaitOutcome {
        loop {
            let available = cursor.load(Ordering::Acquire);
            if available >= sequence {
                return WaitOutcome::Available(available);
            }
            if alerted.load(Ordering::Acquire) {
                return WaitOutcome::Alerted;
            }
            hint::spin_loop();
        }
    }

    fn signal(&self) {}
}

/// Spin briefly, then yield the timeslice between polls.
#[derive(Debug, Default)]
pub struct YieldingWaitStrategy;

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(&self, sequence: i64, cursor: &AtomicI64, alerted: &AtomicBool) -> WaitOutcome {
        let mut spins: u32 = 0;
        loop {
            let available = cursor.load(Ordering::Acquire);
            if available >= sequence {
                return WaitOutcome::Available(available);
            }
            if alerted.load(Ordering::Acquire) {
                return WaitOutcome::Alerted;
            }
            if spins < SPIN_YIELD_THRESHOLD {
                spins += 1;
                hint::spin_loop();
            } else {
                thread::yield_now();
            }
        }
    }

    fn signal(&self) {}
}

/// Park on a condvar until a producer signals.
///
/// `signal` takes the lock before notifying, which closes the race between a
/// consumer's final cursor check and its park: a publish is either visible to
/// that check or delivers a notification.
#[derive(Debug, Default)]
pub struct BlockingWaitStrategy {
    lock: Mutex<()>,
    condvar: Condvar,
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(&self, sequence: i64, cursor: &AtomicI64, alerted: &AtomicBool) -> WaitOutcome {
        loop {
            let available = cursor.load(Ordering::Acquire);
            if available >= sequence {
                return WaitOutcome::Available(available);
            }
            if alerted.load(Ordering::Acquire) {
                return WaitOutcome::Alerted;
            }

            let mut guard = self.lock.lock();
            // Re-check under the lock; a publish between the check above and
            // the lock acquisition would otherwise be a lost wakeup.
            let available = cursor.load(Ordering::Acquire);
            if available >= sequence {
                return WaitOutcome::Available(available);
            }
            if alerted.load(Ordering::Acquire) {
                return WaitOutcome::Alerted;
            }
            self.condvar.wait(&mut guard);
        }
    }

    fn signal(&self) {
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }
}

/// Configuration-level selector for a wait strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    BusySpin,
    Yielding,
    Blocking,
}

impl Default for WaitKind {
    fn default() -> Self {
        WaitKind::Blocking
    }
}

impl WaitKind {
    /// Build the strategy this kind names.
    pub fn build(self) -> Box<dyn WaitStrategy> {
        match self {
            WaitKind::BusySpin => Box::new(BusySpinWaitStrategy),
            WaitKind::Yielding => Box::new(YieldingWaitStrategy),
            WaitKind::Blocking => Box::new(BlockingWaitStrategy::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn exercise_strategy(strategy: Arc<dyn WaitStrategy>) {
        let cursor = Arc::new(AtomicI64::new(-1));
        let alerted = Arc::new(AtomicBool::new(false));

        let waiter_cursor = cursor.clone();
        let waiter_alerted = alerted.clone();
        let waiter_strategy = strategy.clone();
        let waiter = std::thread::spawn(move || {
            waiter_strategy.wait_for(3, &waiter_cursor, &waiter_alerted)
        });

        std::thread::sleep(Duration::from_millis(20));
        cursor.store(3, Ordering::Release);
        strategy.signal();

        assert_eq!(waiter.join().unwrap(), WaitOutcome::Available(3));
    }

    #[test]
    fn blocking_strategy_wakes_on_publish() {
        exercise_strategy(Arc::new(BlockingWaitStrategy::default()));
    }

    #[test]
    fn yielding_strategy_observes_publish() {
        exercise_strategy(Arc::new(YieldingWaitStrategy));
    }

    #[test]
    fn busy_spin_observes_publish() {
        exercise_strategy(Arc::new(BusySpinWaitStrategy));
    }

    #[test]
    fn alert_interrupts_blocked_waiter() {
        let strategy = Arc::new(BlockingWaitStrategy::default());
        let cursor = Arc::new(AtomicI64::new(-1));
        let alerted = Arc::new(AtomicBool::new(false));

        let waiter_cursor = cursor.clone();
        let waiter_alerted = alerted.clone();
        let waiter_strategy = strategy.clone();
        let waiter = std::thread::spawn(move || {
            waiter_strategy.wait_for(0, &waiter_cursor, &waiter_alerted)
        });

        std::thread::sleep(Duration::from_millis(20));
        alerted.store(true, Ordering::Release);
        strategy.signal();

        assert_eq!(waiter.join().unwrap(), WaitOutcome::Alerted);
    }

    #[test]
    fn already_available_returns_without_waiting() {
        let cursor = AtomicI64::new(7);
        let alerted = AtomicBool::new(false);
        let outcome = BusySpinWaitStrategy.wait_for(5, &cursor, &alerted);
        assert_eq!(outcome, WaitOutcome::Available(7));
    }
}
