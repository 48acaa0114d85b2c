//! # Thread-Pool Dispatcher
//!
//! A fixed-size worker pool fed by a bounded FIFO queue. Submission order per
//! producer is preserved on the queue, but execution order across tasks is
//! not guaranteed — whichever worker frees up first wins. Backpressure is
//! blocking: when the queue is full, `dispatch` blocks the producer until a
//! worker frees a slot.
//!
//! Shutdown closes the queue's sending side; workers drain everything already
//! enqueued before exiting, which is what lets `await_and_shutdown` report a
//! clean drain even when individual tasks take substantial wall-clock time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::task::{Job, TaskUnit};
use super::{Dispatcher, DrainLatch, Executor, LifecycleCell, LifecycleState};
use crate::constants::system;
use crate::error::{DispatchError, Result};

/// State the worker threads share with the dispatcher handle. Workers hold
/// only this (plus their receiver), so dropping the dispatcher drops the last
/// sender and lets the pool wind down on its own.
struct PoolShared {
    name: String,
    pending: AtomicU64,
    lifecycle: LifecycleCell,
    drain: DrainLatch,
}

pub struct ThreadPoolDispatcher<T: Send + 'static> {
    shared: Arc<PoolShared>,
    sender: RwLock<Option<Sender<Job<T>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> std::fmt::Debug for ThreadPoolDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolDispatcher")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> ThreadPoolDispatcher<T> {
    /// Build a pool with explicit worker count and queue capacity.
    pub fn new(name: impl Into<String>, workers: usize, queue_capacity: usize) -> Result<Self> {
        let name = name.into();
        if workers == 0 || queue_capacity == 0 {
            return Err(DispatchError::Configuration {
                component: name,
                reason: "thread pool needs at least one worker and one queue slot".to_string(),
            });
        }

        let (sender, receiver) = channel::bounded::<Job<T>>(queue_capacity);
        let shared = Arc::new(PoolShared {
            name: name.clone(),
            pending: AtomicU64::new(0),
            lifecycle: LifecycleCell::new(),
            drain: DrainLatch::new(workers),
        });

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let worker_shared = shared.clone();
            let worker_receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-worker-{index}"))
                .spawn(move || worker_loop(&worker_shared, &worker_receiver))
                .map_err(|error| DispatchError::Internal {
                    message: format!("failed to spawn pool worker: {error}"),
                })?;
            handles.push(handle);
        }

        debug!(dispatcher = %name, workers, queue_capacity, "thread pool started");
        Ok(Self {
            shared,
            sender: RwLock::new(Some(sender)),
            handles: Mutex::new(handles),
        })
    }

    /// Build a pool from the crate defaults.
    pub fn with_defaults(name: impl Into<String>) -> Result<Self> {
        Self::new(
            name,
            system::DEFAULT_POOL_WORKERS,
            system::DEFAULT_POOL_QUEUE_CAPACITY,
        )
    }

    fn submit_job(&self, job: Job<T>) -> Result<()> {
        let shared = &self.shared;
        if !shared.lifecycle.is_alive() {
            return Err(self.rejected());
        }
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            return Err(self.rejected());
        };
        shared.pending.fetch_add(1, Ordering::SeqCst);
        // Blocks while the bounded queue is full: producer-side backpressure.
        if sender.send(job).is_err() {
            shared.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(self.rejected());
        }
        Ok(())
    }

    fn rejected(&self) -> DispatchError {
        DispatchError::Rejected {
            dispatcher: self.shared.name.clone(),
            state: self.shared.lifecycle.load(),
        }
    }

    fn begin_shutdown(&self) {
        if self.shared.lifecycle.try_begin_shutdown() {
            info!(
                dispatcher = %self.shared.name,
                backlog = self.shared.pending.load(Ordering::SeqCst),
                "thread pool shutting down; draining backlog"
            );
            // Dropping the sender closes the queue; workers exit after the
            // backlog is empty.
            drop(self.sender.write().take());
        }
    }
}

impl<T: Send + 'static> Executor for ThreadPoolDispatcher<T> {
    fn execute(&self, work: Box<dyn FnOnce() + Send>) -> Result<()> {
        self.submit_job(Job::Run(work))
    }
}

impl<T: Send + 'static> Dispatcher<T> for ThreadPoolDispatcher<T> {
    fn dispatch(&self, task: TaskUnit<T>) -> Result<()> {
        self.submit_job(Job::Task(task))
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
        self.shared.pending.load(Ordering::SeqCst)
    }

    fn lifecycle(&self) -> LifecycleState {
        self.shared.lifecycle.load()
    }

    fn name(&self) -> &str {
        &self.shared.name
    }
}

impl<T: Send + 'static> Drop for ThreadPoolDispatcher<T> {
    fn drop(&mut self) {
        self.begin_shutdown();
    }
}

fn worker_loop<T: Send + 'static>(shared: &PoolShared, receiver: &Receiver<Job<T>>) {
    // recv fails only once the queue is empty AND every sender is gone, so
    // the backlog present at shutdown always runs to completion.
    while let Ok(job) = receiver.recv() {
        job.run();
        shared.pending.fetch_sub(1, Ordering::SeqCst);
    }
    if shared.drain.arrive() == 0 {
        shared.lifecycle.mark_terminated();
        debug!(dispatcher = %shared.name, "thread pool drained and terminated");
    }
}
