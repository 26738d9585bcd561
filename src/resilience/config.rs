//! # Circuit Breaker Configuration
//!
//! Provides configuration structures and validation for circuit breaker behavior.
//!
//! [`CircuitBreakerConfig`] is the fully-resolved configuration a breaker runs with.
//! [`CircuitBreakerConfigPatch`] is the serializable, all-optional override form used by
//! configuration files, templates, `create` and bulk config updates. Patches carry
//! durations as milliseconds so they read naturally in TOML/YAML.

use crate::error::{ResilienceError, Result};
use crate::resilience::classifier::FailureClassifier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit (once volume is reached)
    pub failure_threshold: u32,

    /// Consecutive successes in half-open state required to close the circuit
    pub success_threshold: u32,

    /// Minimum number of calls in the window before any open condition is evaluated
    pub volume_threshold: u32,

    /// Failure rate (percent, 0-100) that opens the circuit
    pub error_percentage_threshold: f64,

    /// Slow-call rate (percent, 0-100) that opens the circuit
    pub slow_call_rate_threshold: f64,

    /// Calls taking at least this long are counted as slow
    pub slow_call_duration_threshold: Duration,

    /// Maximum time a protected operation may run before it is reported as timed out
    pub timeout: Duration,

    /// Base time to wait in open state before attempting recovery
    pub reset_timeout: Duration,

    /// Upper bound for the backed-off reset timeout
    pub max_reset_timeout: Duration,

    /// Age limit of call records kept in the sliding window
    pub monitoring_period: Duration,

    /// Maximum number of call records kept in the sliding window
    pub metrics_window_size: usize,

    /// Scale the reset timeout by `backoff_multiplier^min(consecutive_failures, 10)`
    pub exponential_backoff: bool,

    pub backoff_multiplier: f64,

    /// Errors matching any entry are never recorded as failures
    pub ignore_errors: Vec<String>,

    /// When non-empty, only errors matching an entry are recorded as failures
    pub record_errors: Vec<String>,

    /// Optional predicate consulted when neither list decides
    #[serde(skip)]
    pub error_filter: Option<Arc<dyn FailureClassifier>>,

    /// Allow calls flagged as emergencies to skip timeout and statistics
    pub emergency_bypass: bool,

    /// Publish per-call operation events and log periodic metrics
    pub enable_metrics: bool,

    /// Publish state-change and threshold events
    pub enable_notifications: bool,
}

impl CircuitBreakerConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        fn invalid(message: &str) -> Result<()> {
            Err(ResilienceError::ConfigurationError(message.to_string()))
        }

        if self.failure_threshold == 0 {
            return invalid("failure_threshold must be greater than 0");
        }

        if self.success_threshold == 0 {
            return invalid("success_threshold must be greater than 0");
        }

        if self.timeout.is_zero() {
            return invalid("timeout must be greater than 0");
        }

        if self.reset_timeout.is_zero() {
            return invalid("reset_timeout must be greater than 0");
        }

        if self.max_reset_timeout < self.reset_timeout {
            return invalid("max_reset_timeout must not be less than reset_timeout");
        }

        if !(self.error_percentage_threshold > 0.0 && self.error_percentage_threshold <= 100.0) {
            return invalid("error_percentage_threshold must be within (0, 100]");
        }

        if !(self.slow_call_rate_threshold > 0.0 && self.slow_call_rate_threshold <= 100.0) {
            return invalid("slow_call_rate_threshold must be within (0, 100]");
        }

        if self.slow_call_duration_threshold.is_zero() {
            return invalid("slow_call_duration_threshold must be greater than 0");
        }

        if self.monitoring_period.is_zero() {
            return invalid("monitoring_period must be greater than 0");
        }

        if self.metrics_window_size == 0 {
            return invalid("metrics_window_size must be greater than 0");
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return invalid("backoff_multiplier must be a finite value >= 1.0");
        }

        Ok(())
    }

    /// Reset timeout to use when the circuit opens with the given consecutive failures
    pub fn reset_timeout_for(&self, consecutive_failures: u32) -> Duration {
        if !self.exponential_backoff {
            return self.reset_timeout;
        }

        let exponent = consecutive_failures.min(10) as i32;
        let scaled_ms = self.reset_timeout.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped_ms = scaled_ms.min(self.max_reset_timeout.as_millis() as f64);

        Duration::from_millis(capped_ms as u64)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            volume_threshold: 10,
            error_percentage_threshold: 50.0,
            slow_call_rate_threshold: 50.0,
            slow_call_duration_threshold: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(60),
            max_reset_timeout: Duration::from_secs(300),
            monitoring_period: Duration::from_secs(60),
            metrics_window_size: 100,
            exponential_backoff: true,
            backoff_multiplier: 2.0,
            ignore_errors: Vec::new(),
            record_errors: Vec::new(),
            error_filter: None,
            emergency_bypass: false,
            enable_metrics: true,
            enable_notifications: true,
        }
    }
}

/// Partial circuit breaker configuration; unset fields keep the base value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfigPatch {
    pub failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    pub volume_threshold: Option<u32>,
    pub error_percentage_threshold: Option<f64>,
    pub slow_call_rate_threshold: Option<f64>,
    pub slow_call_duration_threshold_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub reset_timeout_ms: Option<u64>,
    pub max_reset_timeout_ms: Option<u64>,
    pub monitoring_period_ms: Option<u64>,
    pub metrics_window_size: Option<usize>,
    pub exponential_backoff: Option<bool>,
    pub backoff_multiplier: Option<f64>,
    pub ignore_errors: Option<Vec<String>>,
    pub record_errors: Option<Vec<String>>,
    pub emergency_bypass: Option<bool>,
    pub enable_metrics: Option<bool>,
    pub enable_notifications: Option<bool>,
}

impl CircuitBreakerConfigPatch {
    /// Resolve this patch against a base configuration
    pub fn apply_to(&self, base: &CircuitBreakerConfig) -> CircuitBreakerConfig {
        let millis = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_millis).unwrap_or(fallback)
        };

        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            success_threshold: self.success_threshold.unwrap_or(base.success_threshold),
            volume_threshold: self.volume_threshold.unwrap_or(base.volume_threshold),
            error_percentage_threshold: self
                .error_percentage_threshold
                .unwrap_or(base.error_percentage_threshold),
            slow_call_rate_threshold: self
                .slow_call_rate_threshold
                .unwrap_or(base.slow_call_rate_threshold),
            slow_call_duration_threshold: millis(
                self.slow_call_duration_threshold_ms,
                base.slow_call_duration_threshold,
            ),
            timeout: millis(self.timeout_ms, base.timeout),
            reset_timeout: millis(self.reset_timeout_ms, base.reset_timeout),
            max_reset_timeout: millis(self.max_reset_timeout_ms, base.max_reset_timeout),
            monitoring_period: millis(self.monitoring_period_ms, base.monitoring_period),
            metrics_window_size: self.metrics_window_size.unwrap_or(base.metrics_window_size),
            exponential_backoff: self.exponential_backoff.unwrap_or(base.exponential_backoff),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(base.backoff_multiplier),
            ignore_errors: self
                .ignore_errors
                .clone()
                .unwrap_or_else(|| base.ignore_errors.clone()),
            record_errors: self
                .record_errors
                .clone()
                .unwrap_or_else(|| base.record_errors.clone()),
            error_filter: base.error_filter.clone(),
            emergency_bypass: self.emergency_bypass.unwrap_or(base.emergency_bypass),
            enable_metrics: self.enable_metrics.unwrap_or(base.enable_metrics),
            enable_notifications: self
                .enable_notifications
                .unwrap_or(base.enable_notifications),
        }
    }

    /// Layer `overlay` on top of this patch; fields set in `overlay` win
    pub fn merge(&self, overlay: &CircuitBreakerConfigPatch) -> CircuitBreakerConfigPatch {
        CircuitBreakerConfigPatch {
            failure_threshold: overlay.failure_threshold.or(self.failure_threshold),
            success_threshold: overlay.success_threshold.or(self.success_threshold),
            volume_threshold: overlay.volume_threshold.or(self.volume_threshold),
            error_percentage_threshold: overlay
                .error_percentage_threshold
                .or(self.error_percentage_threshold),
            slow_call_rate_threshold: overlay
                .slow_call_rate_threshold
                .or(self.slow_call_rate_threshold),
            slow_call_duration_threshold_ms: overlay
                .slow_call_duration_threshold_ms
                .or(self.slow_call_duration_threshold_ms),
            timeout_ms: overlay.timeout_ms.or(self.timeout_ms),
            reset_timeout_ms: overlay.reset_timeout_ms.or(self.reset_timeout_ms),
            max_reset_timeout_ms: overlay.max_reset_timeout_ms.or(self.max_reset_timeout_ms),
            monitoring_period_ms: overlay.monitoring_period_ms.or(self.monitoring_period_ms),
            metrics_window_size: overlay.metrics_window_size.or(self.metrics_window_size),
            exponential_backoff: overlay.exponential_backoff.or(self.exponential_backoff),
            backoff_multiplier: overlay.backoff_multiplier.or(self.backoff_multiplier),
            ignore_errors: overlay
                .ignore_errors
                .clone()
                .or_else(|| self.ignore_errors.clone()),
            record_errors: overlay
                .record_errors
                .clone()
                .or_else(|| self.record_errors.clone()),
            emergency_bypass: overlay.emergency_bypass.or(self.emergency_bypass),
            enable_metrics: overlay.enable_metrics.or(self.enable_metrics),
            enable_notifications: overlay.enable_notifications.or(self.enable_notifications),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &CircuitBreakerConfigPatch::default()
    }
}
