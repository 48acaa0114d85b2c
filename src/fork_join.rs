//! # Fork/Join Task Runner
//!
//! Submits a collection of independent functions to an executor and funnels
//! their results into one downstream sink. Fan-out happens on `submit`; the
//! runner itself is done once every function has been handed to the executor
//! — completion of the underlying work is the sink's business, not the
//! runner's.
//!
//! Error funneling follows the sink's completion state: a failure is pushed
//! while the sink still accepts values, and logged-and-swallowed once the
//! sink has completed (pushing an error into a fulfilled single-value
//! promise is meaningless).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::dispatch::Executor;
use crate::error::{BoxError, Result};

/// Downstream sink collaborator: receives values and errors from fan-out
/// tasks and reports whether it still accepts more.
pub trait ResultSink<T>: Send + Sync {
    fn push_value(&self, value: T);
    fn push_error(&self, error: BoxError);
    fn is_complete(&self) -> bool;
}

type ForkTask<I, R> =
    Arc<dyn Fn(Option<&I>) -> std::result::Result<Option<R>, BoxError> + Send + Sync>;

/// An ordered collection of independent functions sharing one result sink.
pub struct ForkJoinRunner<I, R> {
    executor: Arc<dyn Executor>,
    sink: Arc<dyn ResultSink<R>>,
    tasks: Vec<ForkTask<I, R>>,
}

impl<I, R> ForkJoinRunner<I, R>
where
    I: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new(executor: Arc<dyn Executor>, sink: Arc<dyn ResultSink<R>>) -> Self {
        Self {
            executor,
            sink,
            tasks: Vec::new(),
        }
    }

    /// Add a function to the collection. Functions returning `Ok(None)` push
    /// nothing onto the sink.
    #[must_use]
    pub fn add<F>(mut self, task: F) -> Self
    where
        F: Fn(Option<&I>) -> std::result::Result<Option<R>, BoxError> + Send + Sync + 'static,
    {
        self.tasks.push(Arc::new(task));
        self
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Submit every task with no input.
    pub fn submit(&self) -> Result<()> {
        self.submit_with(None)
    }

    /// Submit every task, passing `input` to each. Returns once all tasks
    /// have been handed to the executor; results arrive on the sink as the
    /// executor runs them.
    pub fn submit_with(&self, input: Option<I>) -> Result<()> {
        for task in &self.tasks {
            let task = task.clone();
            let sink = self.sink.clone();
            let input = input.clone();
            self.executor.execute(Box::new(move || {
                match task(input.as_ref()) {
                    Ok(Some(value)) => sink.push_value(value),
                    Ok(None) => {}
                    Err(task_error) => {
                        if sink.is_complete() {
                            error!(
                                error = %task_error,
                                "fork/join task failed after sink completed; error dropped"
                            );
                        } else {
                            sink.push_error(task_error);
                        }
                    }
                }
            }))?;
        }
        Ok(())
    }
}

enum PromiseState<T> {
    Pending,
    Done(std::result::Result<T, BoxError>),
    Taken,
}

/// Single-value sink: complete after the first value or error.
pub struct PromiseSink<T> {
    state: Mutex<PromiseState<T>>,
    completed: Condvar,
}

impl<T> PromiseSink<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PromiseState::Pending),
            completed: Condvar::new(),
        })
    }

    /// Block until the promise completes or `timeout` elapses; the outcome
    /// can be taken once.
    pub fn await_outcome(&self, timeout: Duration) -> Option<std::result::Result<T, BoxError>> {
        let mut state = self.state.lock();
        let timed_out = self
            .completed
            .wait_while_for(
                &mut state,
                |state| matches!(*state, PromiseState::Pending),
                timeout,
            )
            .timed_out();
        if timed_out {
            return None;
        }
        match std::mem::replace(&mut *state, PromiseState::Taken) {
            PromiseState::Done(outcome) => Some(outcome),
            _ => None,
        }
    }

    fn complete(&self, outcome: std::result::Result<T, BoxError>) {
        let mut state = self.state.lock();
        if matches!(*state, PromiseState::Pending) {
            *state = PromiseState::Done(outcome);
            self.completed.notify_all();
        } else {
            debug!("promise already complete; late result dropped");
        }
    }
}

impl<T: Send> ResultSink<T> for PromiseSink<T> {
    fn push_value(&self, value: T) {
        self.complete(Ok(value));
    }

    fn push_error(&self, error: BoxError) {
        self.complete(Err(error));
    }

    fn is_complete(&self) -> bool {
        !matches!(*self.state.lock(), PromiseState::Pending)
    }
}

/// Items delivered by a [`StreamSink`].
pub type StreamItem<T> = std::result::Result<T, BoxError>;

/// Open stream sink over an unbounded channel; accepts values until closed.
pub struct StreamSink<T> {
    sender: Sender<StreamItem<T>>,
    closed: AtomicBool,
}

impl<T: Send> StreamSink<T> {
    /// Create a sink and the receiving half results arrive on.
    pub fn channel() -> (Arc<Self>, Receiver<StreamItem<T>>) {
        let (sender, receiver) = channel::unbounded();
        (
            Arc::new(Self {
                sender,
                closed: AtomicBool::new(false),
            }),
            receiver,
        )
    }

    /// Stop accepting values; later pushes are dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn push(&self, item: StreamItem<T>) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("stream sink closed; item dropped");
            return;
        }
        if self.sender.send(item).is_err() {
            debug!("stream receiver gone; item dropped");
        }
    }
}

impl<T: Send> ResultSink<T> for StreamSink<T> {
    fn push_value(&self, value: T) {
        self.push(Ok(value));
    }

    fn push_error(&self, error: BoxError) {
        self.push(Err(error));
    }

    fn is_complete(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
