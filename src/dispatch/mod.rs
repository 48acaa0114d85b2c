//! # Dispatcher Abstraction
//!
//! A uniform contract over four concurrency strategies:
//!
//! - [`sync::SynchronousDispatcher`] — caller's thread, no queueing
//! - [`thread_pool::ThreadPoolDispatcher`] — bounded queue, fixed worker pool
//! - [`ring_buffer::RingBufferDispatcher`] — single-consumer ring, strict FIFO
//! - [`work_queue::WorkQueueDispatcher`] — multi-consumer ring, max throughput
//!
//! Callers (the event bus, the fork/join runner) depend only on the
//! [`Dispatcher`] and [`Executor`] traits; every variant honors the same
//! ordering, backpressure, shutdown-draining and error-isolation contracts,
//! so swapping strategies never changes caller-visible semantics beyond the
//! documented ordering differences.

pub mod ring;
pub mod ring_buffer;
pub mod sync;
pub mod task;
pub mod thread_pool;
pub mod wait;
pub mod work_queue;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::Result;

pub use ring::{BackpressurePolicy, ProducerMode};
pub use ring_buffer::RingBufferDispatcher;
pub use sync::SynchronousDispatcher;
pub use task::{ErrorHandler, SuccessHandler, TaskUnit};
pub use thread_pool::ThreadPoolDispatcher;
pub use wait::{BlockingWaitStrategy, BusySpinWaitStrategy, WaitKind, WaitStrategy, YieldingWaitStrategy};
pub use work_queue::WorkQueueDispatcher;

/// Dispatcher lifecycle: `Alive` accepts work, `ShuttingDown` drains
/// already-enqueued work, `Terminated` means the backing threads have exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Alive,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Alive => "alive",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Terminated => "terminated",
        };
        write!(f, "{name}")
    }
}

/// Fire-and-forget execution contract, the narrow interface consumed by the
/// fork/join runner. Every dispatcher is an executor.
pub trait Executor: Send + Sync {
    /// Enqueue a bare closure for execution under the dispatcher's strategy.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DispatchError::Rejected`] once shutdown has
    /// begun, or `CapacityExceeded` under a fail-fast backpressure policy.
    fn execute(&self, work: Box<dyn FnOnce() + Send>) -> Result<()>;
}

/// The uniform dispatch contract (spec'd operations: dispatch, execute,
/// shutdown, await-and-shutdown, backlog).
pub trait Dispatcher<T: Send + 'static>: Executor {
    /// Enqueue a task unit for later execution.
    ///
    /// Never executes on the calling thread, except in the synchronous
    /// variant where enqueue and execute are the same step.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DispatchError::Rejected`] once shutdown has
    /// begun, or `CapacityExceeded` under a fail-fast backpressure policy.
    fn dispatch(&self, task: TaskUnit<T>) -> Result<()>;

    /// Begin shutdown: stop accepting work, let the backlog drain. Does not
    /// wait.
    fn shutdown(&self);

    /// Begin shutdown and block until the backlog has drained and the backing
    /// threads exited, or until `timeout` elapses. Returns whether the drain
    /// completed cleanly. A timeout is an expected outcome, not an error.
    fn await_and_shutdown(&self, timeout: Duration) -> bool;

    /// Producer cursor minus consumer cursor at the instant of the call.
    /// Advisory only: races with concurrent producers and consumers.
    fn backlog_size(&self) -> u64;

    /// Current lifecycle state.
    fn lifecycle(&self) -> LifecycleState;

    /// Instance name, used in errors and structured log fields.
    fn name(&self) -> &str;
}

/// Atomic lifecycle state machine shared by dispatcher internals.
#[derive(Debug)]
pub(crate) struct LifecycleCell(AtomicU8);

const STATE_ALIVE: u8 = 0;
const STATE_SHUTTING_DOWN: u8 = 1;
const STATE_TERMINATED: u8 = 2;

impl LifecycleCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(STATE_ALIVE))
    }

    pub(crate) fn load(&self) -> LifecycleState {
        match self.0.load(Ordering::SeqCst) {
            STATE_ALIVE => LifecycleState::Alive,
            STATE_SHUTTING_DOWN => LifecycleState::ShuttingDown,
            _ => LifecycleState::Terminated,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst) == STATE_ALIVE
    }

    /// Transition `Alive -> ShuttingDown`. Returns whether this call won the
    /// transition (shutdown work runs exactly once).
    pub(crate) fn try_begin_shutdown(&self) -> bool {
        self.0
            .compare_exchange(
                STATE_ALIVE,
                STATE_SHUTTING_DOWN,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub(crate) fn mark_terminated(&self) {
        self.0.store(STATE_TERMINATED, Ordering::SeqCst);
    }
}

/// Countdown latch the backing threads arrive at on exit; `await_and_shutdown`
/// blocks on it with a deadline.
#[derive(Debug)]
pub(crate) struct DrainLatch {
    remaining: Mutex<usize>,
    drained: Condvar,
}

impl DrainLatch {
    pub(crate) fn new(parties: usize) -> Self {
        Self {
            remaining: Mutex::new(parties),
            drained: Condvar::new(),
        }
    }

    /// Record one thread's exit; returns the number still outstanding.
    pub(crate) fn arrive(&self) -> usize {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.drained.notify_all();
        }
        *remaining
    }

    /// Block until every party has arrived or the timeout elapses. Returns
    /// whether the latch fully drained.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return true;
        }
        !self
            .drained
            .wait_while_for(&mut remaining, |remaining| *remaining > 0, timeout)
            .timed_out()
    }
}
