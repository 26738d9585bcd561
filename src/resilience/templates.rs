//! Named configuration presets for common dependency types.

use crate::error::{ResilienceError, Result};
use crate::resilience::config::CircuitBreakerConfigPatch;
use std::collections::HashMap;

/// Catalog of named configuration presets
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: HashMap<String, CircuitBreakerConfigPatch>,
}

impl TemplateCatalog {
    /// Catalog containing the built-in presets
    pub fn builtin() -> Self {
        let mut catalog = Self {
            templates: HashMap::new(),
        };
        catalog.register("healthcare", Self::for_healthcare());
        catalog.register("database", Self::for_database());
        catalog.register("queue", Self::for_queue());
        catalog.register("external_api", Self::for_external_api());
        catalog.register("critical_service", Self::for_critical_service());
        catalog
    }

    /// Patient-facing dependencies: trips early, recovers cautiously and lets
    /// emergency calls through
    pub fn for_healthcare() -> CircuitBreakerConfigPatch {
        CircuitBreakerConfigPatch {
            failure_threshold: Some(3),
            success_threshold: Some(5),
            volume_threshold: Some(5),
            error_percentage_threshold: Some(25.0),
            slow_call_rate_threshold: Some(30.0),
            slow_call_duration_threshold_ms: Some(2_000),
            timeout_ms: Some(10_000),
            reset_timeout_ms: Some(30_000),
            max_reset_timeout_ms: Some(120_000),
            emergency_bypass: Some(true),
            ..Default::default()
        }
    }

    /// Create configuration for database operations
    pub fn for_database() -> CircuitBreakerConfigPatch {
        CircuitBreakerConfigPatch {
            failure_threshold: Some(5),
            success_threshold: Some(2),
            slow_call_duration_threshold_ms: Some(1_000),
            timeout_ms: Some(30_000),
            reset_timeout_ms: Some(30_000),
            ..Default::default()
        }
    }

    /// Create configuration for queue operations
    pub fn for_queue() -> CircuitBreakerConfigPatch {
        CircuitBreakerConfigPatch {
            failure_threshold: Some(3),
            success_threshold: Some(2),
            timeout_ms: Some(15_000),
            reset_timeout_ms: Some(15_000),
            ..Default::default()
        }
    }

    /// Create configuration for external API calls
    pub fn for_external_api() -> CircuitBreakerConfigPatch {
        CircuitBreakerConfigPatch {
            failure_threshold: Some(5),
            success_threshold: Some(2),
            error_percentage_threshold: Some(60.0),
            timeout_ms: Some(45_000),
            reset_timeout_ms: Some(60_000),
            max_reset_timeout_ms: Some(600_000),
            backoff_multiplier: Some(3.0),
            ..Default::default()
        }
    }

    /// Services that must not be hammered while degraded
    pub fn for_critical_service() -> CircuitBreakerConfigPatch {
        CircuitBreakerConfigPatch {
            failure_threshold: Some(2),
            success_threshold: Some(5),
            volume_threshold: Some(5),
            error_percentage_threshold: Some(20.0),
            timeout_ms: Some(5_000),
            reset_timeout_ms: Some(60_000),
            max_reset_timeout_ms: Some(300_000),
            emergency_bypass: Some(true),
            ..Default::default()
        }
    }

    /// Add or replace a template
    pub fn register(&mut self, name: impl Into<String>, template: CircuitBreakerConfigPatch) {
        self.templates.insert(name.into(), template);
    }

    pub fn get(&self, name: &str) -> Result<&CircuitBreakerConfigPatch> {
        self.templates
            .get(name)
            .ok_or_else(|| ResilienceError::ConfigurationError(format!("Unknown template: {name}")))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::resilience::config::CircuitBreakerConfig;

    #[test]
    fn test_builtin_templates_resolve_to_valid_configs() {
        let catalog = TemplateCatalog::builtin();
        assert_eq!(
            catalog.names(),
            vec!["critical_service", "database", "external_api", "healthcare", "queue"]
        );

        for name in catalog.names() {
            let config = catalog.get(&name).unwrap().apply_to(&CircuitBreakerConfig::default());
            assert!(config.validate().is_ok(), "template {name} is invalid");
        }
    }

    #[test]
    fn test_healthcare_enables_emergency_bypass() {
        let config = TemplateCatalog::for_healthcare().apply_to(&CircuitBreakerConfig::default());
        assert!(config.emergency_bypass);
        assert_eq!(config.failure_threshold, 3);
    }

    #[test]
    fn test_unknown_template() {
        let err = TemplateCatalog::builtin().get("mainframe").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
    }
}
