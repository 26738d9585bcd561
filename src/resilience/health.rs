//! # Health Scoring
//!
//! Converts a breaker's statistics and state into graded indicators, a 0-100 health
//! score, and issues/recommendations produced by the [`HEALTH_RULES`] table. The
//! manager folds per-breaker health into a [`GlobalHealth`] view with a cascade
//! failure risk estimate.
//!
//! Indicators are graded by `value / threshold`:
//!
//! | ratio      | status   | score |
//! |------------|----------|-------|
//! | `<= 0.5`   | HEALTHY  | 100   |
//! | `<= 0.8`   | WARNING  | 60    |
//! | otherwise  | CRITICAL | 20    |
//!
//! Availability is graded on its shortfall from 100.

use crate::resilience::config::CircuitBreakerConfig;
use crate::resilience::metrics::CircuitBreakerStats;
use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const HEALTHY_SCORE_THRESHOLD: f64 = 70.0;
const AVAILABILITY_THRESHOLD: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndicatorStatus {
    Healthy,
    Warning,
    Critical,
}

impl IndicatorStatus {
    pub fn grade(value: f64, threshold: f64) -> Self {
        let ratio = if threshold > 0.0 {
            value / threshold
        } else if value > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        if ratio <= 0.5 {
            IndicatorStatus::Healthy
        } else if ratio <= 0.8 {
            IndicatorStatus::Warning
        } else {
            IndicatorStatus::Critical
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            IndicatorStatus::Healthy => 100.0,
            IndicatorStatus::Warning => 60.0,
            IndicatorStatus::Critical => 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthIndicator {
    pub value: f64,
    pub threshold: f64,
    pub status: IndicatorStatus,
}

impl HealthIndicator {
    pub fn graded(value: f64, threshold: f64) -> Self {
        Self {
            value,
            threshold,
            status: IndicatorStatus::grade(value, threshold),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthIndicators {
    /// Windowed failure rate (percent) against `error_percentage_threshold`
    pub failure_rate: HealthIndicator,
    /// Average response time (ms) against `slow_call_duration_threshold`
    pub response_time: HealthIndicator,
    /// 100 while calls flow, 0 otherwise
    pub availability: HealthIndicator,
    pub error_rate: HealthIndicator,
}

impl HealthIndicators {
    pub fn from_stats(stats: &CircuitBreakerStats, config: &CircuitBreakerConfig) -> Self {
        let failure_rate = HealthIndicator::graded(
            stats.window.failure_rate,
            config.error_percentage_threshold,
        );

        let availability_value = match stats.state {
            CircuitState::Closed | CircuitState::ForcedClosed => 100.0,
            _ => 0.0,
        };

        Self {
            failure_rate,
            response_time: HealthIndicator::graded(
                stats.window.average_response_time.as_secs_f64() * 1000.0,
                config.slow_call_duration_threshold.as_secs_f64() * 1000.0,
            ),
            availability: HealthIndicator {
                value: availability_value,
                threshold: AVAILABILITY_THRESHOLD,
                status: IndicatorStatus::grade(
                    AVAILABILITY_THRESHOLD - availability_value,
                    AVAILABILITY_THRESHOLD,
                ),
            },
            error_rate: failure_rate,
        }
    }

    pub fn all(&self) -> [HealthIndicator; 4] {
        [
            self.failure_rate,
            self.response_time,
            self.availability,
            self.error_rate,
        ]
    }

    /// Unweighted mean of the indicator scores
    pub fn score(&self) -> f64 {
        let indicators = self.all();
        indicators.iter().map(|i| i.status.score()).sum::<f64>() / indicators.len() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Up,
    Degraded,
    Down,
}

impl HealthStatus {
    pub fn from_score(state: CircuitState, score: f64) -> Self {
        if matches!(state, CircuitState::Open | CircuitState::ForcedOpen) {
            return HealthStatus::Down;
        }

        if score >= 80.0 {
            HealthStatus::Up
        } else if score >= 50.0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Down
        }
    }
}

/// Inputs visible to a health rule
pub struct RuleInput<'a> {
    pub state: CircuitState,
    pub indicators: &'a HealthIndicators,
}

/// Condition mapped to an issue and its recommendations
pub struct HealthRule {
    pub condition: fn(&RuleInput<'_>) -> bool,
    pub issue: Option<&'static str>,
    pub recommendations: &'static [&'static str],
}

pub static HEALTH_RULES: &[HealthRule] = &[
    HealthRule {
        condition: |input| input.state == CircuitState::Open,
        issue: Some("Circuit is OPEN"),
        recommendations: &[
            "Check the health of the downstream dependency",
            "Wait for automatic recovery or reset the circuit once the dependency is restored",
        ],
    },
    HealthRule {
        condition: |input| input.state == CircuitState::ForcedOpen,
        issue: Some("Circuit is FORCED_OPEN"),
        recommendations: &["Force-close or reset the circuit when maintenance is complete"],
    },
    HealthRule {
        condition: |input| input.state == CircuitState::ForcedClosed,
        issue: Some("Circuit is FORCED_CLOSED and failures are not isolated"),
        recommendations: &["Return the circuit to automatic mode with a reset when safe"],
    },
    HealthRule {
        condition: |input| input.state == CircuitState::HalfOpen,
        issue: Some("Circuit is HALF_OPEN and testing recovery"),
        recommendations: &["Monitor trial calls before restoring full traffic"],
    },
    HealthRule {
        condition: |input| input.indicators.failure_rate.status == IndicatorStatus::Critical,
        issue: Some("Failure rate is critical"),
        recommendations: &["Investigate the root cause of failures"],
    },
    HealthRule {
        condition: |input| input.indicators.failure_rate.status == IndicatorStatus::Warning,
        issue: Some("Failure rate is elevated"),
        recommendations: &["Monitor failure trends"],
    },
    HealthRule {
        condition: |input| input.indicators.response_time.status == IndicatorStatus::Critical,
        issue: Some("Response times are critical"),
        recommendations: &["Review downstream latency and timeout settings"],
    },
    HealthRule {
        condition: |input| input.indicators.response_time.status == IndicatorStatus::Warning,
        issue: Some("Response times are approaching the slow-call threshold"),
        recommendations: &[],
    },
];

/// Derived health snapshot of a single breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerHealth {
    pub name: String,
    pub state: CircuitState,
    pub health_score: f64,
    pub is_healthy: bool,
    pub status: HealthStatus,
    pub indicators: HealthIndicators,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    /// Time since the last state change
    pub uptime: Duration,
    pub checked_at: DateTime<Utc>,
}

impl BreakerHealth {
    pub fn assess(stats: &CircuitBreakerStats, config: &CircuitBreakerConfig) -> Self {
        let indicators = HealthIndicators::from_stats(stats, config);
        let health_score = indicators.score();

        let input = RuleInput {
            state: stats.state,
            indicators: &indicators,
        };

        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        for rule in HEALTH_RULES.iter().filter(|rule| (rule.condition)(&input)) {
            if let Some(issue) = rule.issue {
                issues.push(issue.to_string());
            }
            recommendations.extend(rule.recommendations.iter().map(|r| r.to_string()));
        }

        Self {
            name: stats.name.clone(),
            state: stats.state,
            health_score,
            is_healthy: health_score >= HEALTHY_SCORE_THRESHOLD,
            status: HealthStatus::from_score(stats.state, health_score),
            indicators,
            issues,
            recommendations,
            uptime: stats.uptime(),
            checked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CascadeRisk {
    Low,
    Medium,
    High,
}

impl CascadeRisk {
    pub fn from_open_fraction(fraction: f64) -> Self {
        if fraction <= 0.1 {
            CascadeRisk::Low
        } else if fraction <= 0.3 {
            CascadeRisk::Medium
        } else {
            CascadeRisk::High
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlobalHealthStatus {
    Healthy,
    Degraded,
    Critical,
}

/// Health across every registered breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalHealth {
    pub total_breakers: usize,
    pub healthy_breakers: usize,
    pub unhealthy_breakers: usize,
    pub open_breakers: usize,
    pub average_health_score: f64,
    pub cascade_failure_risk: CascadeRisk,
    pub status: GlobalHealthStatus,
    pub recommended_actions: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl GlobalHealth {
    pub fn from_breakers(breakers: &[BreakerHealth]) -> Self {
        let total_breakers = breakers.len();
        let healthy_breakers = breakers.iter().filter(|b| b.is_healthy).count();
        let open_breakers = breakers
            .iter()
            .filter(|b| b.state == CircuitState::Open)
            .count();

        let (average_health_score, open_fraction) = if total_breakers == 0 {
            (100.0, 0.0)
        } else {
            (
                breakers.iter().map(|b| b.health_score).sum::<f64>() / total_breakers as f64,
                open_breakers as f64 / total_breakers as f64,
            )
        };

        let cascade_failure_risk = CascadeRisk::from_open_fraction(open_fraction);

        let status = if average_health_score < 50.0 || cascade_failure_risk == CascadeRisk::High {
            GlobalHealthStatus::Critical
        } else if average_health_score < 80.0 || cascade_failure_risk == CascadeRisk::Medium {
            GlobalHealthStatus::Degraded
        } else {
            GlobalHealthStatus::Healthy
        };

        let unhealthy_breakers = total_breakers - healthy_breakers;
        let mut recommended_actions = Vec::new();

        match cascade_failure_risk {
            CascadeRisk::High => recommended_actions.push(
                "Cascade failure risk is HIGH: investigate dependencies shared by open circuits"
                    .to_string(),
            ),
            CascadeRisk::Medium => recommended_actions.push(
                "Several circuits are open: review recent deployments and dependency health"
                    .to_string(),
            ),
            CascadeRisk::Low => {}
        }

        if unhealthy_breakers > 0 {
            recommended_actions.push(format!(
                "{unhealthy_breakers} circuit breaker(s) unhealthy: review individual breaker health"
            ));
        }

        if status == GlobalHealthStatus::Critical {
            recommended_actions
                .push("Enable degraded-mode fallbacks for critical workflows".to_string());
        }

        Self {
            total_breakers,
            healthy_breakers,
            unhealthy_breakers,
            open_breakers,
            average_health_score,
            cascade_failure_risk,
            status,
            recommended_actions,
            checked_at: Utc::now(),
        }
    }
}
