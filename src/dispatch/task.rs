//! # Task Unit
//!
//! The smallest schedulable item: a payload paired with a success handler and
//! an optional error handler. Every dispatcher variant moves `TaskUnit`s from
//! producers to consumers; [`TaskUnit::run`] is the single consumption
//! boundary where user code executes.
//!
//! The invariant that matters here: nothing a handler does — returning an
//! error, panicking, or panicking inside its own error handler — may escape
//! `run`. A consumer thread survives every task it executes.

use std::panic::{self, AssertUnwindSafe};

use tracing::error;

use crate::error::{BoxError, TaskError};

/// Success handler invoked with the task payload on the consuming thread.
pub type SuccessHandler<T> = Box<dyn FnOnce(T) -> Result<(), BoxError> + Send>;

/// Error handler invoked when the success handler fails or panics.
pub type ErrorHandler = Box<dyn FnOnce(TaskError) + Send>;

/// An immutable unit of work: payload plus handlers.
///
/// Ownership transfers to the dispatcher on `dispatch` and to the consuming
/// thread at the moment of claim; the unit is consumed exactly once.
pub struct TaskUnit<T> {
    payload: T,
    on_success: SuccessHandler<T>,
    on_error: Option<ErrorHandler>,
}

impl<T> TaskUnit<T> {
    /// Create a task from a payload and its success handler.
    pub fn new<F>(payload: T, on_success: F) -> Self
    where
        F: FnOnce(T) -> Result<(), BoxError> + Send + 'static,
    {
        Self {
            payload,
            on_success: Box::new(on_success),
            on_error: None,
        }
    }

    /// Attach an error handler; without one, failures are logged and dropped.
    #[must_use]
    pub fn with_error_handler<F>(mut self, on_error: F) -> Self
    where
        F: FnOnce(TaskError) + Send + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Execute the task under the error-isolation guard.
    ///
    /// A returned error or a panic from the success handler is converted to a
    /// [`TaskError`] and routed to the error handler; with no error handler it
    /// is logged. Never panics, never returns an error.
    pub(crate) fn run(self) {
        let TaskUnit {
            payload,
            on_success,
            on_error,
        } = self;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| on_success(payload)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(source)) => route_failure(on_error, TaskError::Handler { source }),
            Err(panic_payload) => route_failure(
                on_error,
                TaskError::Panic {
                    message: panic_message(panic_payload.as_ref()),
                },
            ),
        }
    }
}

impl<T> std::fmt::Debug for TaskUnit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskUnit")
            .field("has_error_handler", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

/// Internal envelope a dispatcher slot holds: either a full task unit or a
/// bare fire-and-forget closure from `execute`.
pub(crate) enum Job<T> {
    Task(TaskUnit<T>),
    Run(Box<dyn FnOnce() + Send>),
}

impl<T> Job<T> {
    /// Run the job under the same isolation guard as a task unit.
    pub(crate) fn run(self) {
        match self {
            Job::Task(task) => task.run(),
            Job::Run(work) => {
                if let Err(panic_payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
                    error!(
                        panic = %panic_message(panic_payload.as_ref()),
                        "fire-and-forget job panicked; consumer continuing"
                    );
                }
            }
        }
    }
}

fn route_failure(on_error: Option<ErrorHandler>, task_error: TaskError) {
    match on_error {
        Some(handler) => {
            // The error handler is user code too; a panic there must not take
            // the consumer thread down either.
            if let Err(panic_payload) =
                panic::catch_unwind(AssertUnwindSafe(move || handler(task_error)))
            {
                error!(
                    panic = %panic_message(panic_payload.as_ref()),
                    "task error handler panicked; error dropped"
                );
            }
        }
        None => {
            error!(error = %task_error, "task failed with no error handler; continuing");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
