//! # Work-Queue Dispatcher (multi consumer)
//!
//! The same ring mechanics as the single-consumer variant, but N consumer
//! threads compete for sequences through an atomic claim on a shared work
//! cursor. Every published task is consumed by exactly one worker; global
//! FIFO order is not preserved — adjacent tasks may run concurrently on
//! different workers. When several idle workers race for the same sequence,
//! exactly one wins the compare-exchange and the others retry; no fairness
//! is promised among the losers.
//!
//! Each worker advertises the sequence below its current claim. The producer
//! gate is the minimum advertisement across workers, which is a lower bound
//! on the fully consumed prefix — a worker only advertises past a sequence
//! after finishing it.

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
use crate::config::{validate_ring_capacity, WorkQueueConfig};
use crate::constants::system;
use crate::error::{DispatchError, Result};

struct WorkShared<T> {
    name: String,
    ring: RingCore<T>,
    wait: Box<dyn WaitStrategy>,
    lifecycle: LifecycleCell,
    alerted: AtomicBool,
    in_flight: AtomicUsize,
    /// Highest sequence claimed for consumption by any worker.
    work_cursor: CachePadded<AtomicI64>,
    /// Per-worker gating sequences (everything at or below is done, as far
    /// as that worker is concerned).
    workers: Box<[CachePadded<AtomicI64>]>,
    drain: DrainLatch,
}

impl<T> WorkShared<T> {
    fn min_worker_sequence(&self) -> i64 {
        self.workers
            .iter()
            .map(|sequence| sequence.load(Ordering::Acquire))
            .min()
            .unwrap_or(INITIAL_SEQUENCE)
    }
}

pub struct WorkQueueDispatcher<T: Send + 'static> {
    shared: Arc<WorkShared<T>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> std::fmt::Debug for WorkQueueDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueueDispatcher")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> WorkQueueDispatcher<T> {
    /// Build a work-queue dispatcher and start its consumer pool.
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        consumers: usize,
        wait: WaitKind,
        backpressure: BackpressurePolicy,
    ) -> Result<Self> {
        let name = name.into();
        validate_ring_capacity(&name, capacity)?;
        if consumers == 0 {
            return Err(DispatchError::Configuration {
                component: name,
                reason: "work queue needs at least one consumer".to_string(),
            });
        }

        let workers = (0..consumers)
            .map(|_| CachePadded::new(AtomicI64::new(INITIAL_SEQUENCE)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let shared = Arc::new(WorkShared {
            ring: RingCore::new(capacity, ProducerMode::Multi, backpressure),
            wait: wait.build(),
            lifecycle: LifecycleCell::new(),
            alerted: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            work_cursor: CachePadded::new(AtomicI64::new(INITIAL_SEQUENCE)),
            workers,
            drain: DrainLatch::new(consumers),
            name: name.clone(),
        });

        let mut handles = Vec::with_capacity(consumers);
        for index in 0..consumers {
            let worker_shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-consumer-{index}"))
                .spawn(move || worker_loop(&worker_shared, index))
                .map_err(|error| DispatchError::Internal {
                    message: format!("failed to spawn work-queue consumer: {error}"),
                })?;
            handles.push(handle);
        }

        debug!(dispatcher = %name, capacity, consumers, "work queue dispatcher started");
        Ok(Self {
            shared,
            handles: Mutex::new(handles),
        })
    }

    /// Build from crate defaults.
    pub fn with_defaults(name: impl Into<String>) -> Result<Self> {
        Self::new(
            name,
            system::DEFAULT_RING_CAPACITY,
            system::DEFAULT_WORK_QUEUE_CONSUMERS,
            WaitKind::Blocking,
            BackpressurePolicy::Block,
        )
    }

    /// Build from a loaded configuration section.
    pub fn from_config(name: impl Into<String>, config: &WorkQueueConfig) -> Result<Self> {
        Self::new(
            name,
            config.capacity,
            config.consumers,
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

        let claim = shared.ring.claim(|| shared.min_worker_sequence());
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
                backlog = shared.ring.backlog(shared.min_worker_sequence()),
                "work queue shutting down; draining"
            );
            shared.alerted.store(true, Ordering::SeqCst);
            shared.wait.signal();
        }
    }
}

impl<T: Send + 'static> Executor for WorkQueueDispatcher<T> {
    fn execute(&self, work: Box<dyn FnOnce() + Send>) -> Result<()> {
        self.enqueue(Job::Run(work))
    }
}

impl<T: Send + 'static> Dispatcher<T> for WorkQueueDispatcher<T> {
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
            for handle in self.handles.lock().drain(..) {
                let _ = handle.join();
            }
        }
        drained
    }

    fn backlog_size(&self) -> u64 {
        self.shared
            .ring
            .backlog(self.shared.min_worker_sequence())
    }

    fn lifecycle(&self) -> LifecycleState {
        self.shared.lifecycle.load()
    }

    fn name(&self) -> &str {
        &self.shared.name
    }
}

impl<T: Send + 'static> Drop for WorkQueueDispatcher<T> {
    fn drop(&mut self) {
        self.begin_shutdown();
    }
}

/// Claim the next work sequence, advertising the prior cursor value as this
/// worker's completed watermark. Callers invoke this only when their previous
/// claim is fully processed, which is what keeps the advertisement truthful.
fn claim_next<T>(shared: &WorkShared<T>, my_sequence: &AtomicI64) -> i64 {
    loop {
        let current = shared.work_cursor.load(Ordering::SeqCst);
        my_sequence.store(current, Ordering::Release);
        if shared
            .work_cursor
            .compare_exchange_weak(current, current + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            return current + 1;
        }
        hint::spin_loop();
    }
}

fn worker_loop<T: Send + 'static>(shared: &WorkShared<T>, index: usize) {
    let my_sequence = &shared.workers[index];
    let mut next = claim_next(shared, my_sequence);
    let mut draining = false;
    loop {
        if shared.ring.published() >= next {
            if let Some(job) = shared.ring.take(next) {
                job.run();
            }
            next = claim_next(shared, my_sequence);
            continue;
        }
        if draining {
            // A claim beyond everything producers ever published is
            // abandoned once no producer is mid-publish.
            if shared.in_flight.load(Ordering::SeqCst) == 0 && shared.ring.claimed() < next {
                break;
            }
            hint::spin_loop();
            continue;
        }
        match shared
            .wait
            .wait_for(next, shared.ring.published_cursor(), &shared.alerted)
        {
            WaitOutcome::Available(_) => {}
            WaitOutcome::Alerted => draining = true,
        }
    }
    // An exited worker must never gate producers.
    my_sequence.store(i64::MAX, Ordering::Release);
    if shared.drain.arrive() == 0 {
        shared.lifecycle.mark_terminated();
        debug!(dispatcher = %shared.name, "work queue drained and terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::collections::HashSet;

    fn work_queue(name: &str, capacity: usize, consumers: usize) -> WorkQueueDispatcher<u64> {
        WorkQueueDispatcher::new(
            name,
            capacity,
            consumers,
            WaitKind::Blocking,
            BackpressurePolicy::Block,
        )
        .unwrap()
    }

    #[test]
    fn every_task_executes_exactly_once() {
        let dispatcher = work_queue("exactly-once", 16, 4);
        let (tx, rx) = channel::unbounded();

        for payload in 0u64..100 {
            let tx = tx.clone();
            dispatcher
                .dispatch(TaskUnit::new(payload, move |value| {
                    tx.send(value).unwrap();
                    Ok(())
                }))
                .unwrap();
        }

        assert!(dispatcher.await_and_shutdown(Duration::from_secs(10)));
        let received: Vec<u64> = rx.try_iter().collect();
        assert_eq!(received.len(), 100);
        let distinct: HashSet<u64> = received.into_iter().collect();
        assert_eq!(distinct.len(), 100);
    }

    #[test]
    fn drains_with_more_consumers_than_tasks() {
        let dispatcher = work_queue("overstaffed", 8, 6);
        let (tx, rx) = channel::unbounded();
        for payload in 0u64..3 {
            let tx = tx.clone();
            dispatcher
                .dispatch(TaskUnit::new(payload, move |value| {
                    tx.send(value).unwrap();
                    Ok(())
                }))
                .unwrap();
        }
        assert!(dispatcher.await_and_shutdown(Duration::from_secs(5)));
        assert_eq!(rx.try_iter().count(), 3);
    }

    #[test]
    fn failing_tasks_do_not_stall_the_pool() {
        let dispatcher = work_queue("faulty", 8, 2);
        let failures = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let sink = failures.clone();
            dispatcher
                .dispatch(
                    TaskUnit::new(0u64, |_| Err("always fails".into())).with_error_handler(
                        move |_| {
                            sink.fetch_add(1, Ordering::SeqCst);
                        },
                    ),
                )
                .unwrap();
        }
        assert!(dispatcher.await_and_shutdown(Duration::from_secs(10)));
        assert_eq!(failures.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn executes_off_the_calling_thread() {
        let dispatcher = work_queue("identity", 8, 2);
        let caller = thread::current().id();
        let (tx, rx) = channel::bounded(1);
        dispatcher
            .execute(Box::new(move || {
                tx.send(thread::current().id()).unwrap();
            }))
            .unwrap();
        assert_ne!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), caller);
        assert!(dispatcher.await_and_shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn rejects_after_shutdown_begins() {
        let dispatcher = work_queue("closing", 8, 2);
        Dispatcher::<u64>::shutdown(&dispatcher);
        let err = dispatcher
            .dispatch(TaskUnit::new(1u64, |_| Ok(())))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { .. }));
        assert!(dispatcher.await_and_shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn zero_consumers_is_a_configuration_error() {
        let result: Result<WorkQueueDispatcher<u64>> = WorkQueueDispatcher::new(
            "bad",
            8,
            0,
            WaitKind::Blocking,
            BackpressurePolicy::Block,
        );
        assert!(matches!(
            result.unwrap_err(),
            DispatchError::Configuration { .. }
        ));
    }
}
