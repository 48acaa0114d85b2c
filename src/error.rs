//! # Dispatch Error Types
//!
//! Structured error handling for the dispatch layer using thiserror for
//! typed errors instead of `Box<dyn Error>` patterns.
//!
//! The split mirrors who observes the failure: [`DispatchError`] is raised
//! synchronously to the caller of `dispatch`/`execute`, while [`TaskError`]
//! travels the other direction and is delivered to a task's own error handler
//! at the consumption boundary (see [`crate::dispatch::TaskUnit`]).

use thiserror::Error;

use crate::dispatch::LifecycleState;

/// Boxed error type produced by user-supplied task handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced synchronously by dispatcher operations.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Dispatch rejected: dispatcher '{dispatcher}' is {state}")]
    Rejected {
        dispatcher: String,
        state: LifecycleState,
    },

    #[error("Capacity exceeded: dispatcher '{dispatcher}' is full ({capacity} slots)")]
    CapacityExceeded { dispatcher: String, capacity: usize },

    #[error("Task execution failed: {0}")]
    TaskExecution(#[from] TaskError),

    #[error("Configuration error: {component}: {reason}")]
    Configuration { component: String, reason: String },

    #[error("Internal dispatch error: {message}")]
    Internal { message: String },
}

/// Failure raised by a task's success handler, routed to the task's error
/// handler (or logged) by the consuming dispatcher. Never propagates out of a
/// consumer loop.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task handler failed: {source}")]
    Handler { source: BoxError },

    #[error("task handler panicked: {message}")]
    Panic { message: String },
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_display_names_dispatcher_and_state() {
        let err = DispatchError::Rejected {
            dispatcher: "orders-ring".to_string(),
            state: LifecycleState::ShuttingDown,
        };
        assert_eq!(
            err.to_string(),
            "Dispatch rejected: dispatcher 'orders-ring' is shutting_down"
        );
    }

    #[test]
    fn task_error_wraps_handler_source() {
        let source: BoxError = "boom".into();
        let err = TaskError::Handler { source };
        assert!(err.to_string().contains("boom"));
    }
}
