//! # Synchronous Dispatcher
//!
//! No queue, no extra thread: `dispatch` runs the task on the calling thread
//! inside the standard error-isolation guard. Useful for tests, for
//! composition roots that want bus semantics without concurrency, and as the
//! degenerate baseline the other variants are measured against.

use std::time::Duration;

use tracing::debug;

use super::task::{Job, TaskUnit};
use super::{Dispatcher, Executor, LifecycleCell, LifecycleState};
use crate::error::{DispatchError, Result};

pub struct SynchronousDispatcher {
    name: String,
    lifecycle: LifecycleCell,
}

impl SynchronousDispatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: LifecycleCell::new(),
        }
    }

    fn run_now<T: Send + 'static>(&self, job: Job<T>) -> Result<()> {
        if !self.lifecycle.is_alive() {
            return Err(DispatchError::Rejected {
                dispatcher: self.name.clone(),
                state: self.lifecycle.load(),
            });
        }
        // Enqueue and execute are the same step here.
        job.run();
        Ok(())
    }
}

impl Executor for SynchronousDispatcher {
    fn execute(&self, work: Box<dyn FnOnce() + Send>) -> Result<()> {
        self.run_now::<()>(Job::Run(work))
    }
}

impl<T: Send + 'static> Dispatcher<T> for SynchronousDispatcher {
    fn dispatch(&self, task: TaskUnit<T>) -> Result<()> {
        self.run_now(Job::Task(task))
    }

    fn shutdown(&self) {
        if self.lifecycle.try_begin_shutdown() {
            // Nothing in flight by construction.
            self.lifecycle.mark_terminated();
            debug!(dispatcher = %self.name, "synchronous dispatcher terminated");
        }
    }

    fn await_and_shutdown(&self, _timeout: Duration) -> bool {
        Dispatcher::<T>::shutdown(self);
        true
    }

    fn backlog_size(&self) -> u64 {
        0
    }

    fn lifecycle(&self) -> LifecycleState {
        self.lifecycle.load()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
