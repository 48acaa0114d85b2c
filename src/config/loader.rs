//! Configuration Loader
//!
//! Environment-aware configuration loading: crate defaults, then an optional
//! TOML file, then `DISPATCH_`-prefixed environment variables, merged in that
//! order. The merged result is validated before it is handed out.

use std::path::Path;
use std::sync::Arc;

use config::builder::{ConfigBuilder, DefaultState};
use config::{Config, Environment, File};
use tracing::{debug, info};

use super::DispatchConfig;
use crate::error::{DispatchError, Result};

/// Loaded-and-validated configuration with its provenance.
#[derive(Debug)]
pub struct ConfigManager {
    config: DispatchConfig,
    environment: String,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection.
    ///
    /// Looks for `config/dispatch.toml` and `config/dispatch.<env>.toml`
    /// relative to the working directory; both are optional.
    pub fn load() -> Result<Arc<ConfigManager>> {
        let environment = detect_environment();
        let builder = defaults_builder()?
            .add_source(File::with_name("config/dispatch").required(false))
            .add_source(File::with_name(&format!("config/dispatch.{environment}")).required(false));

        Self::finish(builder, environment)
    }

    /// Load configuration from an explicit file, with environment overrides
    /// still applied on top.
    pub fn load_from_file(path: &Path) -> Result<Arc<ConfigManager>> {
        let environment = detect_environment();
        let builder = defaults_builder()?.add_source(File::from(path.to_path_buf()));
        Self::finish(builder, environment)
    }

    fn finish(
        builder: ConfigBuilder<DefaultState>,
        environment: String,
    ) -> Result<Arc<ConfigManager>> {
        let merged = builder
            .add_source(
                Environment::with_prefix("DISPATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?;

        let config: DispatchConfig = merged.try_deserialize().map_err(config_error)?;
        config.validate()?;

        debug!(
            ring_capacity = config.ring_buffer.capacity,
            pool_workers = config.thread_pool.workers,
            work_queue_consumers = config.work_queue.consumers,
            "configuration merged"
        );
        info!(environment = %environment, "Dispatch configuration loaded");

        Ok(Arc::new(ConfigManager {
            config,
            environment,
        }))
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Get the environment the configuration was loaded for.
    pub fn environment(&self) -> &str {
        &self.environment
    }
}

fn defaults_builder() -> Result<ConfigBuilder<DefaultState>> {
    let defaults = Config::try_from(&DispatchConfig::default()).map_err(config_error)?;
    Ok(Config::builder().add_source(defaults))
}

fn config_error(error: config::ConfigError) -> DispatchError {
    DispatchError::Configuration {
        component: "loader".to_string(),
        reason: error.to_string(),
    }
}

/// Detect the running environment (`development` when unset).
fn detect_environment() -> String {
    std::env::var("DISPATCH_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_any_file() {
        let manager = ConfigManager::load().unwrap();
        assert_eq!(
            manager.config().ring_buffer.capacity,
            crate::constants::system::DEFAULT_RING_CAPACITY
        );
    }
}
