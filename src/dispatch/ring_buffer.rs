//! # Ring-Buffer Dispatcher (single consumer)
//!
//! One dedicated consumer thread owns the consumer cursor; producers (one or
//! many, per [`ProducerMode`]) claim slots on the shared ring. The defining
//! property of this variant is strict FIFO: tasks execute in exactly the
//! order their sequences were published, regardless of producer count.
//!
//! Re-entrant dispatch from inside a consumer callback is an ordinary
//! producer claim — the claim path and the consumer cursor are independent
//! atomics, so a callback running on the consumer thread enqueues without
//! waiting on itself (unless the ring is full, which would require the
//! consumer to free the slot it is currently occupying).

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::ring::{BackpressurePolicy, ProducerMode, RingCore, INITIAL_SEQUENCE};
use super::task::{Job, TaskUnit};
use super::wait::{WaitKind, WaitOutcome, WaitStrategy};
use super::{Dispatcher, DrainLatch, Executor, LifecycleCell, LifecycleState};
use crate::config::{validate_ring_capacity, RingBufferConfig};
use crate::constants::system;
use crate::error::{DispatchError, Result};

struct RingShared<T> {
    name: String,
    ring: RingCore<T>,
    wait: Box<dyn WaitStrategy>,
    lifecycle: LifecycleCell,
    alerted: AtomicBool,
    /// Producers currently between the liveness check and their publish.
    /// The consumer may only conclude "no more claims are coming" once this
    /// is zero after shutdown began.
    in_flight: AtomicUsize,
    consumed: CachePadded<AtomicI64>,
    drain: DrainLatch,
}

pub struct RingBufferDispatcher<T: Send + 'static> {
    shared: Arc<RingShared<T>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> std::fmt::Debug for RingBufferDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBufferDispatcher")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> RingBufferDispatcher<T> {
    /// Build a ring-buffer dispatcher and start its consumer thread.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        producer_mode: ProducerMode,
        wait: WaitKind,
        backpressure: BackpressurePolicy,
    ) -> Result<Self> {
        let name = name.into();
        validate_ring_capacity(&name, capacity)?;

        let shared = Arc::new(RingShared {
            ring: RingCore::new(capacity, producer_mode, backpressure),
            wait: wait.build(),
            lifecycle: LifecycleCell::new(),
            alerted: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            consumed: CachePadded::new(AtomicI64::new(INITIAL_SEQUENCE)),
            drain: DrainLatch::new(1),
            name: name.clone(),
        });

        let consumer_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("{name}-consumer"))
            .spawn(move || consumer_loop(&consumer_shared))
            .map_err(|error| DispatchError::Internal {
                message: format!("failed to spawn ring consumer: {error}"),
            })?;

        debug!(dispatcher = %name, capacity, ?producer_mode, "ring buffer dispatcher started");
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Build from crate defaults: multi-producer, blocking wait, blocking
    /// backpressure.
    pub fn with_defaults(name: impl Into<String>) -> Result<Self> {
        Self::new(
            name,
            system::DEFAULT_RING_CAPACITY,
            ProducerMode::Multi,
            WaitKind::Blocking,
            BackpressurePolicy::Block,
        )
    }

    /// Build from a loaded configuration section.
    pub fn from_config(name: impl Into<String>, config: &RingBufferConfig) -> Result<Self> {
        Self::new(
            name,
            config.capacity,
            config.producer_mode,
            config.wait,
            config.backpressure,
        )
    }

    fn enqueue(&self, job: Job<T>) -> Result<()> {
        let shared = &self.shared;
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        if !shared.lifecycle.is_alive() {
            shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(DispatchError::Rejected {
                dispatcher: shared.name.clone(),
                state: shared.lifecycle.load(),
            });
        }

        let claim = shared
            .ring
            .claim(|| shared.consumed.load(Ordering::Acquire));
        let sequence = match claim {
            Ok(sequence) => sequence,
            Err(_) => {
                shared.in_flight.fetch_sub(1, Ordering::SeqCst);
                return Err(DispatchError::CapacityExceeded {
                    dispatcher: shared.name.clone(),
                    capacity: shared.ring.capacity(),
                });
            }
        };

        shared.ring.write_and_publish(sequence, job);
        shared.wait.signal();
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn begin_shutdown(&self) {
        let shared = &self.shared;
        if shared.lifecycle.try_begin_shutdown() {
            info!(
                dispatcher = %shared.name,
                backlog = shared.ring.backlog(shared.consumed.load(Ordering::Acquire)),
                "ring buffer shutting down; draining"
            );
            shared.alerted.store(true, Ordering::SeqCst);
            shared.wait.signal();
        }
    }
}

impl<T: Send + 'static> Executor for RingBufferDispatcher<T> {
    fn execute(&self, work: Box<dyn FnOnce() + Send>) -> Result<()> {
        self.enqueue(Job::Run(work))
    }
}

impl<T: Send + 'static> Dispatcher<T> for RingBufferDispatcher<T> {
    fn dispatch(&self, task: TaskUnit<T>) -> Result<()> {
        self.enqueue(Job::Task(task))
    }

    fn shutdown(&self) {
        self.begin_shutdown();
    }

    fn await_and_shutdown(&self, timeout: Duration) -> bool {
        self.begin_shutdown();
        let drained = self.shared.drain.wait_timeout(timeout);
        if drained {
            if let Some(handle) = self.handle.lock().take() {
                let _ = handle.join();
            }
        }
        drained
    }

    fn backlog_size(&self) -> u64 {
        self.shared
            .ring
            .backlog(self.shared.consumed.load(Ordering::Acquire))
    }

    fn lifecycle(&self) -> LifecycleState {
        self.shared.lifecycle.load()
    }

    fn name(&self) -> &str {
        &self.shared.name
    }
}

impl<T: Send + 'static> Drop for RingBufferDispatcher<T> {
    fn drop(&mut self) {
        self.begin_shutdown();
    }
}

fn consumer_loop<T: Send + 'static>(shared: &RingShared<T>) {
    let mut next: i64 = 0;
    'run: loop {
        match shared
            .wait
            .wait_for(next, shared.ring.published_cursor(), &shared.alerted)
        {
            WaitOutcome::Available(highest) => {
                while next <= highest {
                    if let Some(job) = shared.ring.take(next) {
                        job.run();
                    }
                    shared.consumed.store(next, Ordering::Release);
                    next += 1;
                }
            }
            WaitOutcome::Alerted => {
                // Drain phase: keep consuming whatever was claimed before the
                // alert. New dispatches are already rejected; claims from
                // producers that slipped past the liveness check finish
                // publishing while in_flight is non-zero.
                loop {
                    if shared.ring.published() >= next {
                        if let Some(job) = shared.ring.take(next) {
                            job.run();
                        }
                        shared.consumed.store(next, Ordering::Release);
                        next += 1;
                        continue;
                    }
                    if shared.in_flight.load(Ordering::SeqCst) == 0
                        && shared.ring.claimed() < next
                    {
                        break 'run;
                    }
                    hint::spin_loop();
                }
            }
        }
    }
    shared.lifecycle.mark_terminated();
    shared.drain.arrive();
    debug!(dispatcher = %shared.name, consumed = next - 1, "ring consumer exited after drain");
}
