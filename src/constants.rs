//! # System Constants and Defaults
//!
//! Operational defaults and well-known routing keys shared across the
//! dispatch layer. Construction-time configuration (see [`crate::config`])
//! starts from these values; callers override them per dispatcher instance.

/// Well-known routing keys for dispatcher lifecycle events.
///
/// The dispatchers themselves do not publish these; they are offered so
/// composition roots wiring an [`crate::bus::EventBus`] agree on key names.
pub mod keys {
    pub const DISPATCHER_STARTED: &str = "dispatcher.started";
    pub const DISPATCHER_SHUTDOWN_REQUESTED: &str = "dispatcher.shutdown_requested";
    pub const DISPATCHER_DRAINED: &str = "dispatcher.drained";
    pub const DISPATCHER_TERMINATED: &str = "dispatcher.terminated";

    pub const TASK_DISPATCHED: &str = "task.dispatched";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
}

/// Operational boundaries and defaults.
pub mod system {
    use std::time::Duration;

    /// Default slot count for ring-backed dispatchers. Must stay a power of
    /// two: sequence-to-slot mapping is a bitmask.
    pub const DEFAULT_RING_CAPACITY: usize = 1024;

    /// Default worker count for the thread-pool dispatcher.
    pub const DEFAULT_POOL_WORKERS: usize = 4;

    /// Default bounded-queue capacity for the thread-pool dispatcher.
    pub const DEFAULT_POOL_QUEUE_CAPACITY: usize = 1024;

    /// Default consumer count for the work-queue dispatcher.
    pub const DEFAULT_WORK_QUEUE_CONSUMERS: usize = 4;

    /// Default grace period for `await_and_shutdown` when a caller does not
    /// supply one.
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

    /// Spins before a waiting thread starts yielding its timeslice.
    pub const SPIN_YIELD_THRESHOLD: u32 = 100;
}
