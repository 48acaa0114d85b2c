//! # Structured Logging Module
//!
//! Environment-aware structured logging for the dispatch layer. Consumer
//! loops log swallowed task failures here, so initialization installs a
//! subscriber with thread names enabled — the thread a task ran on is usually
//! the first question when debugging a dispatcher.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber.
/// Honors `DISPATCH_LOG` (an `EnvFilter` directive string) and falls back to
/// a level derived from the detected environment.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = detect_environment();
        let filter = EnvFilter::try_from_env("DISPATCH_LOG")
            .unwrap_or_else(|_| EnvFilter::new(default_log_level(&environment)));

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_level(true),
        );

        // Use try_init to avoid panic if a global subscriber already exists
        // (common when embedded in a host application).
        if subscriber.with(filter).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing");
        }

        tracing::debug!(
            environment = %environment,
            "structured logging initialized"
        );
    });
}

/// Get current environment from environment variables.
fn detect_environment() -> String {
    std::env::var("DISPATCH_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment.
fn default_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_mapping() {
        assert_eq!(default_log_level("test"), "debug");
        assert_eq!(default_log_level("development"), "debug");
        assert_eq!(default_log_level("production"), "info");
    }
}
