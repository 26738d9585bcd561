//! Event shapes emitted by breakers and the manager.

use crate::resilience::health::{CascadeRisk, GlobalHealthStatus};
use crate::resilience::metrics::CircuitBreakerStats;
use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which open condition tripped a breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdType {
    FailureRate,
    SlowCallRate,
    ConsecutiveFailures,
}

impl std::fmt::Display for ThresholdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ThresholdType::FailureRate => "failure_rate",
            ThresholdType::SlowCallRate => "slow_call_rate",
            ThresholdType::ConsecutiveFailures => "consecutive_failures",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BreakerEvent {
    StateChanged {
        breaker_name: String,
        old_state: CircuitState,
        new_state: CircuitState,
        timestamp: DateTime<Utc>,
        stats: Box<CircuitBreakerStats>,
    },
    Operation {
        breaker_name: String,
        operation: String,
        success: bool,
        duration: Duration,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ThresholdExceeded {
        breaker_name: String,
        threshold_type: ThresholdType,
        threshold: f64,
        actual: f64,
        timestamp: DateTime<Utc>,
    },
    /// Audit record of a call that skipped the breaker
    EmergencyBypass {
        breaker_name: String,
        operation: String,
        request_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// Published by the manager's health sweep when global health is critical
    HealthAlert {
        status: GlobalHealthStatus,
        average_health_score: f64,
        cascade_failure_risk: CascadeRisk,
        open_breakers: usize,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl BreakerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BreakerEvent::StateChanged { .. } => "state-changed",
            BreakerEvent::Operation { .. } => "operation",
            BreakerEvent::ThresholdExceeded { .. } => "threshold-exceeded",
            BreakerEvent::EmergencyBypass { .. } => "emergency-bypass",
            BreakerEvent::HealthAlert { .. } => "health-alert",
        }
    }

    /// Breaker the event concerns; manager-level events have none
    pub fn breaker_name(&self) -> Option<&str> {
        match self {
            BreakerEvent::StateChanged { breaker_name, .. }
            | BreakerEvent::Operation { breaker_name, .. }
            | BreakerEvent::ThresholdExceeded { breaker_name, .. }
            | BreakerEvent::EmergencyBypass { breaker_name, .. } => Some(breaker_name),
            BreakerEvent::HealthAlert { .. } => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            BreakerEvent::StateChanged { timestamp, .. }
            | BreakerEvent::Operation { timestamp, .. }
            | BreakerEvent::ThresholdExceeded { timestamp, .. }
            | BreakerEvent::EmergencyBypass { timestamp, .. }
            | BreakerEvent::HealthAlert { timestamp, .. } => *timestamp,
        }
    }
}
