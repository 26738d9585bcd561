//! # Manager Configuration
//!
//! Settings for [`CircuitBreakerManager`](crate::resilience::CircuitBreakerManager):
//! registry limits, background sweep intervals, the shared emergency code, the
//! default breaker configuration and breakers declared up front.
//!
//! Configuration is layered by [`ConfigLoader`]: built-in defaults, then an optional
//! TOML/YAML/JSON file, then `BREAKER__*` environment variables.
//!
//! ```toml
//! max_breakers = 50
//! health_check_interval_ms = 10000
//!
//! [default_config]
//! failure_threshold = 5
//! timeout_ms = 2000
//!
//! [breakers.patient_records]
//! template = "healthcare"
//! config = { timeout_ms = 1500 }
//! ```
//!
//! Keys are case-insensitive and are lowercased on load, so breaker names declared
//! in a file should be lowercase.

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

use crate::resilience::config::{CircuitBreakerConfig, CircuitBreakerConfigPatch};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A breaker created when the manager initializes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerDefinition {
    /// Template to start from; the manager default when absent
    pub template: Option<String>,
    /// Overrides applied on top of the template
    pub config: CircuitBreakerConfigPatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Maximum number of registered breakers
    pub max_breakers: usize,

    pub health_check_interval_ms: u64,
    pub metrics_collection_interval_ms: u64,
    pub cleanup_interval_ms: u64,

    pub enable_health_checks: bool,
    pub enable_metrics_collection: bool,
    pub enable_cleanup: bool,

    /// Shared code required for emergency execution; emergency execution is
    /// refused when unset
    pub emergency_code: Option<String>,

    /// Capacity of the broadcast channel carrying breaker events
    pub event_channel_capacity: usize,

    /// Applied to every breaker before templates and per-breaker overrides
    pub default_config: CircuitBreakerConfigPatch,

    /// Additional templates, merged over the built-in catalog
    pub templates: HashMap<String, CircuitBreakerConfigPatch>,

    /// Breakers created on initialization, keyed by name
    pub breakers: HashMap<String, BreakerDefinition>,
}

impl ManagerConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn metrics_collection_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_collection_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Base configuration for new breakers
    pub fn base_breaker_config(&self) -> CircuitBreakerConfig {
        self.default_config.apply_to(&CircuitBreakerConfig::default())
    }

    /// Validate manager settings
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_breakers == 0 {
            return Err(ConfigurationError::invalid_value(
                "max_breakers",
                "0",
                "must be greater than 0",
            ));
        }

        for (field, value) in [
            ("health_check_interval_ms", self.health_check_interval_ms),
            ("metrics_collection_interval_ms", self.metrics_collection_interval_ms),
            ("cleanup_interval_ms", self.cleanup_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "must be greater than 0",
                ));
            }
        }

        if self.event_channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "event_channel_capacity",
                "0",
                "must be greater than 0",
            ));
        }

        if self.breakers.len() > self.max_breakers {
            return Err(ConfigurationError::validation_error(format!(
                "{} breakers declared but max_breakers is {}",
                self.breakers.len(),
                self.max_breakers
            )));
        }

        self.base_breaker_config()
            .validate()
            .map_err(|e| ConfigurationError::validation_error(format!("default_config: {e}")))
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_breakers: 100,
            health_check_interval_ms: 30_000,
            metrics_collection_interval_ms: 60_000,
            cleanup_interval_ms: 300_000,
            enable_health_checks: true,
            enable_metrics_collection: true,
            enable_cleanup: true,
            emergency_code: None,
            event_channel_capacity: 1000,
            default_config: CircuitBreakerConfigPatch::default(),
            templates: HashMap::new(),
            breakers: HashMap::new(),
        }
    }
}
