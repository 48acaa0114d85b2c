//! # Dispatch Configuration System
//!
//! Typed, validated configuration for every dispatcher variant and the event
//! bus. Values start from the defaults in [`crate::constants::system`] and
//! are merged from an optional config file plus `DISPATCH_`-prefixed
//! environment overrides (see [`loader::ConfigManager`]).
//!
//! Validation is explicit: a non-power-of-two ring capacity or a zero-sized
//! pool is a [`DispatchError::Configuration`] at load time, never a silent
//! fallback at dispatch time.

pub mod loader;

use serde::{Deserialize, Serialize};

use crate::constants::system;
use crate::dispatch::ring::{BackpressurePolicy, ProducerMode};
use crate::dispatch::wait::WaitKind;
use crate::error::{DispatchError, Result};

pub use loader::ConfigManager;

/// Root configuration for the dispatch layer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub ring_buffer: RingBufferConfig,
    pub work_queue: WorkQueueConfig,
    pub thread_pool: ThreadPoolConfig,
    pub bus: BusConfig,
}

/// Settings for the single-consumer ring-buffer dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RingBufferConfig {
    /// Slot count; must be a power of two.
    pub capacity: usize,
    pub producer_mode: ProducerMode,
    pub wait: WaitKind,
    pub backpressure: BackpressurePolicy,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            capacity: system::DEFAULT_RING_CAPACITY,
            producer_mode: ProducerMode::Multi,
            wait: WaitKind::Blocking,
            backpressure: BackpressurePolicy::Block,
        }
    }
}

/// Settings for the multi-consumer work-queue dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkQueueConfig {
    /// Slot count; must be a power of two.
    pub capacity: usize,
    pub consumers: usize,
    pub wait: WaitKind,
    pub backpressure: BackpressurePolicy,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            capacity: system::DEFAULT_RING_CAPACITY,
            consumers: system::DEFAULT_WORK_QUEUE_CONSUMERS,
            wait: WaitKind::Blocking,
            backpressure: BackpressurePolicy::Block,
        }
    }
}

/// Settings for the thread-pool dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            workers: system::DEFAULT_POOL_WORKERS,
            queue_capacity: system::DEFAULT_POOL_QUEUE_CAPACITY,
        }
    }
}

/// Settings for the event bus composition root.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BusConfig {
    /// Which dispatcher variant backs `EventBus::from_config`.
    pub dispatcher: DispatcherKind,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherKind::ThreadPool,
        }
    }
}

/// Dispatcher variant selector for configuration-driven wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherKind {
    Synchronous,
    ThreadPool,
    RingBuffer,
    WorkQueue,
}

impl DispatchConfig {
    /// Validate operational boundaries before any dispatcher is built.
    pub fn validate(&self) -> Result<()> {
        validate_ring_capacity("ring_buffer", self.ring_buffer.capacity)?;
        validate_ring_capacity("work_queue", self.work_queue.capacity)?;
        validate_nonzero("work_queue.consumers", self.work_queue.consumers)?;
        validate_nonzero("thread_pool.workers", self.thread_pool.workers)?;
        validate_nonzero("thread_pool.queue_capacity", self.thread_pool.queue_capacity)?;
        Ok(())
    }
}

pub(crate) fn validate_ring_capacity(component: &str, capacity: usize) -> Result<()> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(DispatchError::Configuration {
            component: component.to_string(),
            reason: format!("ring capacity must be a non-zero power of two, got {capacity}"),
        });
    }
    Ok(())
}

fn validate_nonzero(component: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(DispatchError::Configuration {
            component: component.to_string(),
            reason: "value must be non-zero".to_string(),
        });
    }
    Ok(())
}
