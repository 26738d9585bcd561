//! Configuration Loader
//!
//! Layers built-in defaults, an optional configuration file and environment
//! variables into a validated [`ManagerConfig`].

use super::error::{ConfigResult, ConfigurationError};
use super::ManagerConfig;
use ::config::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default prefix for environment overrides, e.g. `BREAKER__MAX_BREAKERS`
pub const DEFAULT_ENV_PREFIX: &str = "BREAKER";

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// Read this file (format chosen by extension) on top of the defaults
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Build, deserialize and validate the layered configuration
    pub fn load(&self) -> ConfigResult<ManagerConfig> {
        // Unset keys fall back to ManagerConfig's serde defaults
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(ConfigurationError::ConfigFileNotFound { path: path.clone() });
            }
            debug!(path = %path.display(), "Loading breaker configuration file");
            builder = builder.add_source(File::from(path.as_path()));
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config: ManagerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            max_breakers = config.max_breakers,
            declared_breakers = config.breakers.len(),
            health_checks = config.enable_health_checks,
            "Breaker configuration loaded"
        );

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
