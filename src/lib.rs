#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Dispatch Core
//!
//! A pluggable task-dispatch layer: one abstraction over several concurrency
//! strategies, a publish/subscribe event bus routed through it, and a
//! fork/join runner that fans independent work out over an executor and
//! funnels results back into a single sink.
//!
//! ## Overview
//!
//! Every dispatcher variant moves [`dispatch::TaskUnit`]s from producers to
//! consumers under the same contract — lifecycle states, backpressure,
//! drain-on-shutdown, and error isolation behave identically — so callers
//! pick a strategy for its performance profile, not its semantics:
//!
//! - [`dispatch::SynchronousDispatcher`] — caller's thread, zero queueing
//! - [`dispatch::ThreadPoolDispatcher`] — bounded queue feeding a fixed pool
//! - [`dispatch::RingBufferDispatcher`] — lock-free ring, one consumer,
//!   strict FIFO execution order
//! - [`dispatch::WorkQueueDispatcher`] — the same ring with competing
//!   consumers, throughput over ordering
//!
//! ## Key Guarantees
//!
//! - **Ordering**: the single-consumer ring executes tasks in exact publish
//!   order; the pool and work queue preserve only per-producer submission
//!   order onto the queue.
//! - **Drain on shutdown**: `await_and_shutdown` lets already-enqueued work
//!   finish and reports a clean drain as a boolean, never an error.
//! - **Error isolation**: a failing or panicking task is routed to its own
//!   error handler (or logged) at the consumption boundary; consumer threads
//!   survive every task.
//! - **Re-entrancy**: consumer callbacks may dispatch into their own
//!   dispatcher; producer claims and consumer cursors are independent.
//!
//! ## Module Organization
//!
//! - [`dispatch`] - the dispatcher contract and all four variants
//! - [`bus`] - selector-based routing over a configured dispatcher
//! - [`fork_join`] - fan-out/fan-in over the executor contract
//! - [`config`] - file/env configuration with explicit validation
//! - [`error`] - structured error handling
//! - [`logging`] - tracing subscriber bootstrap
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use dispatch_core::bus::{Event, EventBus, KeySelector};
//! use dispatch_core::dispatch::{Dispatcher, RingBufferDispatcher};
//!
//! # fn main() -> dispatch_core::error::Result<()> {
//! let dispatcher: Arc<RingBufferDispatcher<Event<u64>>> =
//!     Arc::new(RingBufferDispatcher::with_defaults("orders")?);
//! let bus = EventBus::new("orders-bus", dispatcher);
//!
//! bus.on(KeySelector::new("order.placed"), |event| {
//!     println!("order {} placed", event.payload());
//!     Ok(())
//! });
//! bus.notify("order.placed", 42_u64)?;
//!
//! bus.dispatcher().await_and_shutdown(Duration::from_secs(5));
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod fork_join;
pub mod logging;

pub use bus::{BusStats, Event, EventBus, KeySelector, Registration, Selector, WildcardSelector};
pub use config::{ConfigManager, DispatchConfig, DispatcherKind};
pub use dispatch::{
    BackpressurePolicy, Dispatcher, Executor, LifecycleState, ProducerMode, RingBufferDispatcher,
    SynchronousDispatcher, TaskUnit, ThreadPoolDispatcher, WaitKind, WorkQueueDispatcher,
};
pub use error::{BoxError, DispatchError, Result, TaskError};
pub use fork_join::{ForkJoinRunner, PromiseSink, ResultSink, StreamSink};
pub use logging::init_structured_logging;
