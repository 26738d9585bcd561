//! # Circuit Breaker Metrics
//!
//! Statistics derived from a breaker's sliding window and lifetime counters, the
//! system-wide aggregate used by the manager, and the [`MetricsCollector`] seam for
//! exporting them to a monitoring system.

use crate::resilience::window::CallRecord;
use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Number of breakers listed in [`GlobalStats::top_failing`]
pub const TOP_FAILING_LIMIT: usize = 10;

/// Select the `p`th percentile of ascending `sorted` durations
///
/// Uses the nearest-rank index `ceil(p/100 * n) - 1` clamped to `[0, n-1]`.
/// An empty slice yields zero.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }

    let rank = (p / 100.0 * sorted.len() as f64).ceil() as i64 - 1;
    let index = rank.clamp(0, sorted.len() as i64 - 1) as usize;
    sorted[index]
}

/// Statistics over the records currently inside the window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub slow_calls: u64,

    /// Percent of windowed calls that failed (0-100)
    pub failure_rate: f64,

    /// Percent of windowed calls that succeeded (0-100)
    pub success_rate: f64,

    /// Percent of windowed calls at or above the slow-call threshold (0-100)
    pub slow_call_rate: f64,

    pub average_response_time: Duration,
    pub p95_response_time: Duration,
    pub p99_response_time: Duration,
}

impl WindowStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a CallRecord>) -> Self {
        let mut stats = WindowStats::default();
        let mut durations = Vec::new();

        for record in records {
            stats.total_calls += 1;
            if record.success {
                stats.successful_calls += 1;
            } else {
                stats.failed_calls += 1;
            }
            if record.is_slow_call {
                stats.slow_calls += 1;
            }
            durations.push(record.duration);
        }

        if stats.total_calls == 0 {
            return stats;
        }

        let total = stats.total_calls as f64;
        stats.failure_rate = stats.failed_calls as f64 / total * 100.0;
        stats.success_rate = stats.successful_calls as f64 / total * 100.0;
        stats.slow_call_rate = stats.slow_calls as f64 / total * 100.0;

        durations.sort_unstable();
        let sum: Duration = durations.iter().sum();
        stats.average_response_time = sum / durations.len() as u32;
        stats.p95_response_time = percentile(&durations, 95.0);
        stats.p99_response_time = percentile(&durations, 99.0);

        stats
    }
}

/// Point-in-time statistics for a single circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,

    /// Windowed statistics
    pub window: WindowStats,

    /// Lifetime counters; these survive window pruning
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub slow_calls: u64,
    pub rejected_calls: u64,
    pub timeout_calls: u64,

    pub consecutive_failures: u32,
    pub consecutive_successes: u32,

    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub next_retry_time: Option<DateTime<Utc>>,
    pub last_state_change: DateTime<Utc>,
}

impl CircuitBreakerStats {
    pub fn failure_rate(&self) -> f64 {
        self.window.failure_rate
    }

    /// Time spent in the current state
    pub fn uptime(&self) -> Duration {
        (Utc::now() - self.last_state_change)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Format statistics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "Breaker: {} | State: {} | Calls: {} | Failures: {} | Rejected: {} | Window failure rate: {:.1}% | Avg: {}ms | p99: {}ms",
            self.name,
            self.state,
            self.total_calls,
            self.failed_calls,
            self.rejected_calls,
            self.window.failure_rate,
            self.window.average_response_time.as_millis(),
            self.window.p99_response_time.as_millis()
        )
    }
}

/// Entry in the global failing-breakers ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailingBreaker {
    pub name: String,
    pub failure_rate: f64,
    pub failed_calls: u64,
    pub state: CircuitState,
}

/// System-wide aggregate across every registered breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_breakers: usize,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub state_counts: HashMap<CircuitState, usize>,

    /// Breakers with a nonzero windowed failure rate, worst first
    pub top_failing: Vec<FailingBreaker>,
    pub collected_at: DateTime<Utc>,
}

impl GlobalStats {
    pub fn from_breakers(stats: &[CircuitBreakerStats]) -> Self {
        let mut state_counts = HashMap::new();
        let mut top_failing = Vec::new();

        for breaker in stats {
            *state_counts.entry(breaker.state).or_insert(0) += 1;

            if breaker.failure_rate() > 0.0 {
                top_failing.push(FailingBreaker {
                    name: breaker.name.clone(),
                    failure_rate: breaker.failure_rate(),
                    failed_calls: breaker.failed_calls,
                    state: breaker.state,
                });
            }
        }

        top_failing.sort_by(|a, b| b.failure_rate.total_cmp(&a.failure_rate));
        top_failing.truncate(TOP_FAILING_LIMIT);

        Self {
            total_breakers: stats.len(),
            total_calls: stats.iter().map(|s| s.total_calls).sum(),
            successful_calls: stats.iter().map(|s| s.successful_calls).sum(),
            failed_calls: stats.iter().map(|s| s.failed_calls).sum(),
            rejected_calls: stats.iter().map(|s| s.rejected_calls).sum(),
            state_counts,
            top_failing,
            collected_at: Utc::now(),
        }
    }

    pub fn count(&self, state: CircuitState) -> usize {
        self.state_counts.get(&state).copied().unwrap_or(0)
    }

    /// Lifetime failure rate across all breakers (0-100)
    pub fn system_failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }

        self.failed_calls as f64 / self.total_calls as f64 * 100.0
    }

    /// Format summary for logging
    pub fn format_summary(&self) -> String {
        format!(
            "Circuit Breakers: {} total | {} closed | {} open | {} half-open | {} forced | System failure rate: {:.2}%",
            self.total_breakers,
            self.count(CircuitState::Closed),
            self.count(CircuitState::Open),
            self.count(CircuitState::HalfOpen),
            self.count(CircuitState::ForcedOpen) + self.count(CircuitState::ForcedClosed),
            self.system_failure_rate()
        )
    }
}

/// Metrics collection trait for integration with monitoring systems
pub trait MetricsCollector: Send + Sync {
    /// Record a breaker's statistics snapshot
    fn record_breaker_stats(&self, stats: &CircuitBreakerStats);

    /// Record circuit breaker state transition
    fn record_state_transition(&self, name: &str, from: CircuitState, to: CircuitState);

    /// Record operation timing
    fn record_operation_timing(&self, name: &str, duration: Duration, success: bool);

    /// Record the system-wide aggregate
    fn record_global_stats(&self, stats: &GlobalStats);
}

/// Collector that emits metrics as structured tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsCollector;

impl MetricsCollector for TracingMetricsCollector {
    fn record_breaker_stats(&self, stats: &CircuitBreakerStats) {
        tracing::info!(
            component = %stats.name,
            total_calls = stats.total_calls,
            successful_calls = stats.successful_calls,
            failed_calls = stats.failed_calls,
            rejected_calls = stats.rejected_calls,
            failure_rate = stats.window.failure_rate,
            state = %stats.state,
            "Circuit breaker metrics"
        );
    }

    fn record_state_transition(&self, name: &str, from: CircuitState, to: CircuitState) {
        tracing::info!(
            component = name,
            from_state = %from,
            to_state = %to,
            "Circuit breaker state transition"
        );
    }

    fn record_operation_timing(&self, name: &str, duration: Duration, success: bool) {
        tracing::debug!(
            component = name,
            duration_ms = duration.as_millis() as u64,
            success = success,
            "Operation timing"
        );
    }

    fn record_global_stats(&self, stats: &GlobalStats) {
        tracing::info!(
            total_breakers = stats.total_breakers,
            total_calls = stats.total_calls,
            failed_calls = stats.failed_calls,
            open = stats.count(CircuitState::Open),
            "{}",
            stats.format_summary()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|v| Duration::from_millis(*v)).collect()
    }

    fn breaker_stats(name: &str, state: CircuitState, failure_rate: f64) -> CircuitBreakerStats {
        CircuitBreakerStats {
            name: name.to_string(),
            state,
            window: WindowStats {
                failure_rate,
                ..Default::default()
            },
            total_calls: 100,
            successful_calls: 100 - failure_rate as u64,
            failed_calls: failure_rate as u64,
            slow_calls: 0,
            rejected_calls: 0,
            timeout_calls: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_time: None,
            last_success_time: None,
            next_retry_time: None,
            last_state_change: Utc::now(),
        }
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let sorted = millis(&[10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
        assert_eq!(percentile(&sorted, 95.0), Duration::from_millis(100));
        assert_eq!(percentile(&sorted, 50.0), Duration::from_millis(50));
        assert_eq!(percentile(&sorted, 0.0), Duration::from_millis(10));
        assert_eq!(percentile(&[], 99.0), Duration::ZERO);
    }

    #[test]
    fn test_window_stats_rates() {
        let records: Vec<CallRecord> = [(true, 10), (false, 20), (false, 200), (true, 30)]
            .iter()
            .map(|(success, ms)| {
                CallRecord::new(
                    *success,
                    Duration::from_millis(*ms),
                    Duration::from_millis(100),
                    None,
                    None,
                )
            })
            .collect();

        let stats = WindowStats::from_records(&records);
        assert_eq!(stats.total_calls, 4);
        assert_eq!(stats.failed_calls, 2);
        assert_eq!(stats.slow_calls, 1);
        assert_eq!(stats.failure_rate, 50.0);
        assert_eq!(stats.slow_call_rate, 25.0);
        assert_eq!(stats.average_response_time, Duration::from_micros(65_000));
        assert_eq!(stats.p99_response_time, Duration::from_millis(200));
    }

    #[test]
    fn test_empty_window_stats() {
        let stats = WindowStats::from_records(&[]);
        assert_eq!(stats, WindowStats::default());
    }

    #[test]
    fn test_global_stats_aggregation() {
        let mut breakers = vec![
            breaker_stats("database", CircuitState::Closed, 5.0),
            breaker_stats("queue", CircuitState::Open, 50.0),
            breaker_stats("cache", CircuitState::Closed, 0.0),
        ];
        for i in 0..12 {
            breakers.push(breaker_stats(&format!("api-{i}"), CircuitState::HalfOpen, 1.0 + i as f64));
        }

        let global = GlobalStats::from_breakers(&breakers);
        assert_eq!(global.total_breakers, 15);
        assert_eq!(global.total_calls, 1500);
        assert_eq!(global.count(CircuitState::Closed), 2);
        assert_eq!(global.count(CircuitState::Open), 1);
        assert_eq!(global.count(CircuitState::ForcedOpen), 0);

        assert_eq!(global.top_failing.len(), TOP_FAILING_LIMIT);
        assert_eq!(global.top_failing[0].name, "queue");
        assert!(global
            .top_failing
            .windows(2)
            .all(|pair| pair[0].failure_rate >= pair[1].failure_rate));
        assert!(global.top_failing.iter().all(|entry| entry.name != "cache"));
    }

    #[test]
    fn test_format_summary() {
        let stats = breaker_stats("database", CircuitState::Closed, 5.0);
        let summary = stats.format_summary();
        assert!(summary.contains("Breaker: database"));
        assert!(summary.contains("State: CLOSED"));
    }
}
