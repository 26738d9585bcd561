//! # Circuit Breaker Implementation
//!
//! Provides fault isolation for a single downstream dependency. The breaker is a
//! five-state machine:
//!
//! - **Closed**: normal operation; the open condition is evaluated at admission
//! - **Open**: failing fast until the (optionally backed-off) reset timeout elapses
//! - **Half-Open**: admitting trial calls until `success_threshold` consecutive successes
//! - **Forced-Open / Forced-Closed**: operator overrides that never auto-transition
//!
//! Admission and any transition it causes happen under one lock, so a call never
//! observes a stale state. Protected async operations run as spawned tasks racing a
//! timer; a late result after a timeout is discarded.

use crate::error::{ErrorKind, ResilienceError};
use crate::events::{BreakerEvent, EventPublisher, ThresholdType};
use crate::logging::log_state_transition;
use crate::resilience::background::BackgroundTask;
use crate::resilience::classifier::{self, FailureContext, OperationTimeout};
use crate::resilience::config::{CircuitBreakerConfig, CircuitBreakerConfigPatch};
use crate::resilience::context::CallContext;
use crate::resilience::health::BreakerHealth;
use crate::resilience::metrics::{
    CircuitBreakerStats, MetricsCollector, TracingMetricsCollector, WindowStats,
};
use crate::resilience::window::{CallRecord, SlidingWindow};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lock-free lifetime counters; these survive window pruning and resets
#[derive(Debug, Default)]
struct AtomicCallCounters {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    slow_calls: AtomicU64,
    rejected_calls: AtomicU64,
    timeout_calls: AtomicU64,
}

impl AtomicCallCounters {
    #[inline]
    fn record(&self, success: bool, slow: bool, timed_out: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }
        if slow {
            self.slow_calls.fetch_add(1, Ordering::Relaxed);
        }
        if timed_out {
            self.timeout_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    fn record_rejection(&self) {
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - trial calls allowed to test system health
    HalfOpen,
    /// Operator override - rejects every call
    ForcedOpen,
    /// Operator override - admits every call
    ForcedClosed,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
            CircuitState::ForcedOpen => "FORCED_OPEN",
            CircuitState::ForcedClosed => "FORCED_CLOSED",
        }
    }

    /// States in which admission is refused
    pub fn is_rejecting(&self) -> bool {
        matches!(self, CircuitState::Open | CircuitState::ForcedOpen)
    }

    pub fn is_forced(&self) -> bool {
        matches!(self, CircuitState::ForcedOpen | CircuitState::ForcedClosed)
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Admission was refused
    #[error("Circuit breaker is {state} for {component}")]
    CircuitOpen {
        component: String,
        state: CircuitState,
        next_retry_time: Option<DateTime<Utc>>,
    },

    /// The operation lost the race against the configured timeout
    #[error("Operation timed out after {}ms for {component}", .timeout.as_millis())]
    OperationTimeout { component: String, timeout: Duration },

    /// Operation failed and was passed through the recording policy
    #[error("Operation failed: {0}")]
    OperationFailed(E),

    /// The spawned operation was cancelled before producing a result
    #[error("Operation aborted for {component}: {reason}")]
    OperationAborted { component: String, reason: String },

    /// Circuit breaker configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Circuit breaker not found: {0}")]
    BreakerNotFound(String),

    #[error("Emergency code rejected for circuit breaker {0}")]
    EmergencyCodeRejected(String),
}

impl<E> CircuitBreakerError<E> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CircuitBreakerError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            CircuitBreakerError::OperationTimeout { .. } => ErrorKind::OperationTimeout,
            CircuitBreakerError::OperationFailed(_) | CircuitBreakerError::OperationAborted { .. } => {
                ErrorKind::OperationFailed
            }
            CircuitBreakerError::ConfigurationError(_) => ErrorKind::ConfigurationError,
            CircuitBreakerError::BreakerNotFound(_) => ErrorKind::BreakerNotFound,
            CircuitBreakerError::EmergencyCodeRejected(_) => ErrorKind::EmergencyCodeRejected,
        }
    }

    /// The wrapped operation error, if this is an operation failure
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            CircuitBreakerError::OperationFailed(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_operation_error(self) -> Option<E> {
        match self {
            CircuitBreakerError::OperationFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<ResilienceError> for CircuitBreakerError<E> {
    fn from(error: ResilienceError) -> Self {
        match error {
            ResilienceError::ConfigurationError(msg) => CircuitBreakerError::ConfigurationError(msg),
            ResilienceError::BreakerNotFound(name) => CircuitBreakerError::BreakerNotFound(name),
            ResilienceError::EmergencyCodeRejected(name) => {
                CircuitBreakerError::EmergencyCodeRejected(name)
            }
        }
    }
}

/// Mutable breaker state; always accessed under one lock
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Failures recorded since the last HALF_OPEN entry
    half_open_failures: u32,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    next_retry_at: Option<Instant>,
    next_retry_time: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
    window: SlidingWindow,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_failures: 0,
            last_failure_time: None,
            last_success_time: None,
            next_retry_at: None,
            next_retry_time: None,
            last_state_change: Utc::now(),
            window: SlidingWindow::new(),
        }
    }

    fn clear_retry(&mut self) {
        self.next_retry_at = None;
        self.next_retry_time = None;
    }
}

/// A state change applied under the lock, announced after it is released
#[derive(Debug)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
    reason: &'static str,
    threshold: Option<ThresholdBreach>,
}

#[derive(Debug, Clone, Copy)]
struct ThresholdBreach {
    threshold_type: ThresholdType,
    threshold: f64,
    actual: f64,
}

/// Outcome of a completed call, prior to classification
struct Outcome<'a> {
    success: bool,
    duration: Duration,
    timed_out: bool,
    error: Option<(&'a dyn Any, &'a str, String)>,
}

/// Core circuit breaker implementation
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Active configuration; every call snapshots the Arc
    config: RwLock<Arc<CircuitBreakerConfig>>,

    /// State, consecutive counters and call window
    inner: Mutex<BreakerState>,

    counters: AtomicCallCounters,

    publisher: Option<EventPublisher>,

    metrics_collector: Arc<dyn MetricsCollector>,

    /// Periodic window maintenance while started
    maintenance: Mutex<Option<BackgroundTask>>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("running", &self.is_running())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> crate::Result<Self> {
        let name = name.into();
        config.validate()?;

        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            volume_threshold = config.volume_threshold,
            timeout_ms = config.timeout.as_millis() as u64,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            success_threshold = config.success_threshold,
            "Circuit breaker initialized"
        );

        Ok(Self {
            name,
            config: RwLock::new(Arc::new(config)),
            inner: Mutex::new(BreakerState::new()),
            counters: AtomicCallCounters::default(),
            publisher: None,
            metrics_collector: Arc::new(TracingMetricsCollector),
            maintenance: Mutex::new(None),
        })
    }

    /// Publish events for this breaker on `publisher`
    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_metrics_collector(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.metrics_collector = collector;
        self
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot of the active configuration
    pub fn config(&self) -> Arc<CircuitBreakerConfig> {
        self.config.read().clone()
    }

    /// Execute an async operation with circuit breaker protection
    ///
    /// The operation's future is spawned onto the runtime and raced against the
    /// configured timeout. On timeout the task keeps running but its result is
    /// discarded. A panic inside the operation is recorded as a failure and then
    /// resumed on the caller.
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation: F,
        context: CallContext,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let config = self.config();
        self.admit::<E>(&config)?;

        if context.is_emergency && config.emergency_bypass {
            self.audit_bypass(&context);
            return operation().await.map_err(CircuitBreakerError::OperationFailed);
        }

        let start = Instant::now();
        let handle = tokio::spawn(operation());

        match tokio::time::timeout(config.timeout, handle).await {
            Ok(Ok(Ok(value))) => {
                self.complete_success(&config, start.elapsed(), &context);
                Ok(value)
            }
            Ok(Ok(Err(e))) => {
                self.complete_failure(&config, start.elapsed(), &e, &context);
                Err(CircuitBreakerError::OperationFailed(e))
            }
            Ok(Err(join_error)) => {
                let reason = join_error.to_string();
                self.complete_failure(&config, start.elapsed(), &reason, &context);

                if join_error.is_panic() {
                    std::panic::resume_unwind(join_error.into_panic());
                }

                Err(CircuitBreakerError::OperationAborted {
                    component: self.name.clone(),
                    reason,
                })
            }
            Err(_elapsed) => {
                // The JoinHandle is dropped here, detaching the task
                let timeout = OperationTimeout {
                    timeout: config.timeout,
                };
                self.record_outcome(
                    &config,
                    Outcome {
                        success: false,
                        duration: start.elapsed(),
                        timed_out: true,
                        error: Some((
                            &timeout as &dyn Any,
                            classifier::short_type_name::<OperationTimeout>(),
                            timeout.to_string(),
                        )),
                    },
                    &context,
                );

                Err(CircuitBreakerError::OperationTimeout {
                    component: self.name.clone(),
                    timeout: config.timeout,
                })
            }
        }
    }

    /// Execute a synchronous operation with circuit breaker protection
    ///
    /// Same admission and recording rules as [`execute`](Self::execute), without
    /// the timeout race.
    pub fn execute_sync<F, T, E>(
        &self,
        operation: F,
        context: CallContext,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display + 'static,
    {
        let config = self.config();
        self.admit::<E>(&config)?;

        if context.is_emergency && config.emergency_bypass {
            self.audit_bypass(&context);
            return operation().map_err(CircuitBreakerError::OperationFailed);
        }

        let start = Instant::now();
        match operation() {
            Ok(value) => {
                self.complete_success(&config, start.elapsed(), &context);
                Ok(value)
            }
            Err(e) => {
                self.complete_failure(&config, start.elapsed(), &e, &context);
                Err(CircuitBreakerError::OperationFailed(e))
            }
        }
    }

    /// Admission decision fused with any transition it causes
    fn admit<E>(&self, config: &CircuitBreakerConfig) -> Result<(), CircuitBreakerError<E>> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let (transition, rejection) = match inner.state {
            CircuitState::ForcedClosed => (None, None),
            CircuitState::ForcedOpen => (None, Some(inner.next_retry_time)),
            CircuitState::Open => {
                let eligible = inner.next_retry_at.map_or(true, |retry_at| now >= retry_at);
                if eligible {
                    let transition = self.transition_locked(
                        &mut inner,
                        CircuitState::HalfOpen,
                        config,
                        "reset timeout elapsed",
                    );
                    (transition, None)
                } else {
                    (None, Some(inner.next_retry_time))
                }
            }
            CircuitState::HalfOpen => {
                // consecutive_failures still carries the count that opened the
                // circuit, so only a failure recorded during this trial may re-open
                if inner.half_open_failures > 0
                    && inner.consecutive_failures >= config.failure_threshold
                {
                    let mut transition = self.transition_locked(
                        &mut inner,
                        CircuitState::Open,
                        config,
                        "half-open trial failed",
                    );
                    if let Some(transition) = transition.as_mut() {
                        transition.threshold = Some(ThresholdBreach {
                            threshold_type: ThresholdType::ConsecutiveFailures,
                            threshold: config.failure_threshold as f64,
                            actual: inner.consecutive_failures as f64,
                        });
                    }
                    (transition, Some(inner.next_retry_time))
                } else {
                    (None, None)
                }
            }
            CircuitState::Closed => match Self::open_condition(&inner, config) {
                Some(breach) => {
                    let mut transition = self.transition_locked(
                        &mut inner,
                        CircuitState::Open,
                        config,
                        "threshold exceeded",
                    );
                    if let Some(transition) = transition.as_mut() {
                        transition.threshold = Some(breach);
                    }
                    (transition, Some(inner.next_retry_time))
                }
                None => (None, None),
            },
        };

        let state = inner.state;
        drop(inner);

        if let Some(transition) = transition {
            self.announce(transition, config);
        }

        match rejection {
            None => Ok(()),
            Some(next_retry_time) => {
                self.counters.record_rejection();
                debug!(
                    component = %self.name,
                    state = %state,
                    "Call rejected by circuit breaker"
                );
                Err(CircuitBreakerError::CircuitOpen {
                    component: self.name.clone(),
                    state,
                    next_retry_time,
                })
            }
        }
    }

    /// Evaluate the CLOSED -> OPEN condition against the current window
    fn open_condition(inner: &BreakerState, config: &CircuitBreakerConfig) -> Option<ThresholdBreach> {
        let window = WindowStats::from_records(inner.window.within(config.monitoring_period));

        if window.total_calls < config.volume_threshold as u64 {
            return None;
        }

        if window.failure_rate >= config.error_percentage_threshold {
            return Some(ThresholdBreach {
                threshold_type: ThresholdType::FailureRate,
                threshold: config.error_percentage_threshold,
                actual: window.failure_rate,
            });
        }

        if window.slow_call_rate >= config.slow_call_rate_threshold {
            return Some(ThresholdBreach {
                threshold_type: ThresholdType::SlowCallRate,
                threshold: config.slow_call_rate_threshold,
                actual: window.slow_call_rate,
            });
        }

        if inner.consecutive_failures >= config.failure_threshold {
            return Some(ThresholdBreach {
                threshold_type: ThresholdType::ConsecutiveFailures,
                threshold: config.failure_threshold as f64,
                actual: inner.consecutive_failures as f64,
            });
        }

        None
    }

    fn complete_success(&self, config: &CircuitBreakerConfig, duration: Duration, context: &CallContext) {
        self.record_outcome(
            config,
            Outcome {
                success: true,
                duration,
                timed_out: false,
                error: None,
            },
            context,
        );
    }

    fn complete_failure<E>(
        &self,
        config: &CircuitBreakerConfig,
        duration: Duration,
        error: &E,
        context: &CallContext,
    ) where
        E: fmt::Display + 'static,
    {
        self.record_outcome(
            config,
            Outcome {
                success: false,
                duration,
                timed_out: false,
                error: Some((
                    error as &dyn Any,
                    classifier::short_type_name::<E>(),
                    error.to_string(),
                )),
            },
            context,
        );
    }

    /// Apply the recording policy, then update counters, window and consecutive state
    fn record_outcome(&self, config: &CircuitBreakerConfig, outcome: Outcome<'_>, context: &CallContext) {
        let message = outcome.error.as_ref().map(|(_, _, message)| message.clone());

        if let Some((error, error_type, message)) = &outcome.error {
            let failure = FailureContext {
                circuit_name: &self.name,
                error: *error,
                error_type,
                message,
                duration: outcome.duration,
            };

            if !classifier::should_record(config, &failure) {
                debug!(
                    component = %self.name,
                    error_type = %error_type,
                    "Failure ignored by recording policy"
                );
                return;
            }
        }

        let record = CallRecord::new(
            outcome.success,
            outcome.duration,
            config.slow_call_duration_threshold,
            message.clone(),
            (context != &CallContext::default()).then(|| context.clone()),
        );
        self.counters
            .record(outcome.success, record.is_slow_call, outcome.timed_out);

        let mut inner = self.inner.lock();
        inner
            .window
            .record(record, config.monitoring_period, config.metrics_window_size);

        let now = Utc::now();
        let transition = if outcome.success {
            inner.consecutive_successes = inner.consecutive_successes.saturating_add(1);
            inner.consecutive_failures = 0;
            inner.last_success_time = Some(now);

            if inner.state == CircuitState::HalfOpen
                && inner.consecutive_successes >= config.success_threshold
            {
                inner.window.clear();
                self.transition_locked(&mut inner, CircuitState::Closed, config, "recovered")
            } else {
                None
            }
        } else {
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            inner.consecutive_successes = 0;
            if inner.state == CircuitState::HalfOpen {
                inner.half_open_failures = inner.half_open_failures.saturating_add(1);
            }
            inner.last_failure_time = Some(now);
            None
        };
        let consecutive_failures = inner.consecutive_failures;
        drop(inner);

        if outcome.success {
            debug!(
                component = %self.name,
                duration_ms = outcome.duration.as_millis() as u64,
                "Operation succeeded"
            );
        } else {
            warn!(
                component = %self.name,
                duration_ms = outcome.duration.as_millis() as u64,
                consecutive_failures = consecutive_failures,
                timed_out = outcome.timed_out,
                error = message.as_deref().unwrap_or_default(),
                "Operation failed"
            );
        }

        if config.enable_metrics {
            self.metrics_collector
                .record_operation_timing(&self.name, outcome.duration, outcome.success);
            self.publish(BreakerEvent::Operation {
                breaker_name: self.name.clone(),
                operation: context.operation_name().to_string(),
                success: outcome.success,
                duration: outcome.duration,
                error: message,
                timestamp: now,
            });
        }

        if let Some(transition) = transition {
            self.announce(transition, config);
        }
    }

    /// Move to `to` while holding the lock; returns `None` if already there
    fn transition_locked(
        &self,
        inner: &mut BreakerState,
        to: CircuitState,
        config: &CircuitBreakerConfig,
        reason: &'static str,
    ) -> Option<Transition> {
        let from = inner.state;
        if from == to {
            return None;
        }

        inner.state = to;
        inner.last_state_change = Utc::now();
        inner.consecutive_successes = 0;
        inner.half_open_failures = 0;

        match to {
            CircuitState::Open => {
                let delay = config.reset_timeout_for(inner.consecutive_failures);
                inner.next_retry_at = Some(Instant::now() + delay);
                inner.next_retry_time = chrono::Duration::from_std(delay)
                    .ok()
                    .map(|delay| inner.last_state_change + delay);
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.clear_retry();
            }
            CircuitState::HalfOpen | CircuitState::ForcedOpen | CircuitState::ForcedClosed => {
                inner.clear_retry();
            }
        }

        Some(Transition {
            from,
            to,
            reason,
            threshold: None,
        })
    }

    /// Log, record and publish a transition after the lock is released
    fn announce(&self, transition: Transition, config: &CircuitBreakerConfig) {
        log_state_transition(&self.name, transition.from, transition.to, transition.reason);

        if transition.to == CircuitState::Open {
            let stats = self.stats();
            error!(
                component = %self.name,
                consecutive_failures = stats.consecutive_failures,
                failure_threshold = config.failure_threshold,
                next_retry_time = ?stats.next_retry_time,
                "Circuit breaker opened (failing fast)"
            );
        }

        self.metrics_collector
            .record_state_transition(&self.name, transition.from, transition.to);

        if !config.enable_notifications {
            return;
        }

        if let Some(breach) = transition.threshold {
            self.publish(BreakerEvent::ThresholdExceeded {
                breaker_name: self.name.clone(),
                threshold_type: breach.threshold_type,
                threshold: breach.threshold,
                actual: breach.actual,
                timestamp: Utc::now(),
            });
        }

        self.publish(BreakerEvent::StateChanged {
            breaker_name: self.name.clone(),
            old_state: transition.from,
            new_state: transition.to,
            timestamp: Utc::now(),
            stats: Box::new(self.stats()),
        });
    }

    fn audit_bypass(&self, context: &CallContext) {
        warn!(
            target: "breaker_core::audit",
            component = %self.name,
            operation = context.operation_name(),
            request_id = context.request_id.as_deref().unwrap_or_default(),
            "Emergency bypass: call executed without circuit breaker protection"
        );

        self.publish(BreakerEvent::EmergencyBypass {
            breaker_name: self.name.clone(),
            operation: context.operation_name().to_string(),
            request_id: context.request_id.clone(),
            timestamp: Utc::now(),
        });
    }

    fn publish(&self, event: BreakerEvent) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(event);
        }
    }

    /// Return to CLOSED with zeroed consecutive counters, no retry time and an empty window
    pub fn reset(&self) {
        let config = self.config();
        let mut inner = self.inner.lock();
        let transition =
            self.transition_locked(&mut inner, CircuitState::Closed, &config, "manual reset");
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.clear_retry();
        inner.window.clear();
        drop(inner);

        info!(component = %self.name, "Circuit breaker reset");
        if let Some(transition) = transition {
            self.announce(transition, &config);
        }
    }

    /// Reject every call until reset or force-closed
    pub fn force_open(&self) {
        self.force(CircuitState::ForcedOpen, "forced open");
    }

    /// Admit every call until reset or force-opened
    pub fn force_close(&self) {
        self.force(CircuitState::ForcedClosed, "forced closed");
    }

    fn force(&self, to: CircuitState, reason: &'static str) {
        let config = self.config();
        let transition = {
            let mut inner = self.inner.lock();
            self.transition_locked(&mut inner, to, &config, reason)
        };

        warn!(component = %self.name, state = %to, "Circuit breaker {}", reason);
        if let Some(transition) = transition {
            self.announce(transition, &config);
        }
    }

    /// Replace the configuration; invalid configurations are rejected and the
    /// previous one stays active
    pub fn update_config(&self, config: CircuitBreakerConfig) -> crate::Result<()> {
        if let Err(e) = config.validate() {
            warn!(component = %self.name, error = %e, "Rejected invalid configuration update");
            return Err(e);
        }

        let config = Arc::new(config);
        *self.config.write() = config.clone();

        self.inner
            .lock()
            .window
            .prune(config.monitoring_period, config.metrics_window_size);

        info!(component = %self.name, "Circuit breaker configuration updated");
        Ok(())
    }

    /// Apply a partial update on top of the active configuration
    pub fn apply_patch(&self, patch: &CircuitBreakerConfigPatch) -> crate::Result<()> {
        let updated = patch.apply_to(&self.config());
        self.update_config(updated)
    }

    /// Statistics over the current window
    pub fn window_stats(&self) -> WindowStats {
        let config = self.config();
        let inner = self.inner.lock();
        WindowStats::from_records(inner.window.within(config.monitoring_period))
    }

    /// Current contents of the call window
    pub fn call_records(&self) -> Vec<CallRecord> {
        self.inner.lock().window.records()
    }

    /// Get current statistics snapshot
    pub fn stats(&self) -> CircuitBreakerStats {
        let config = self.config();
        let inner = self.inner.lock();

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            window: WindowStats::from_records(inner.window.within(config.monitoring_period)),
            total_calls: self.counters.total_calls.load(Ordering::Relaxed),
            successful_calls: self.counters.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.counters.failed_calls.load(Ordering::Relaxed),
            slow_calls: self.counters.slow_calls.load(Ordering::Relaxed),
            rejected_calls: self.counters.rejected_calls.load(Ordering::Relaxed),
            timeout_calls: self.counters.timeout_calls.load(Ordering::Relaxed),
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            last_failure_time: inner.last_failure_time,
            last_success_time: inner.last_success_time,
            next_retry_time: inner.next_retry_time,
            last_state_change: inner.last_state_change,
        }
    }

    /// Derived health snapshot
    pub fn health(&self) -> BreakerHealth {
        BreakerHealth::assess(&self.stats(), &self.config())
    }

    pub fn is_healthy(&self) -> bool {
        self.health().is_healthy
    }

    /// Prune expired records from the window; returns how many were dropped
    pub fn run_maintenance(&self) -> usize {
        let config = self.config();
        let removed = self
            .inner
            .lock()
            .window
            .prune(config.monitoring_period, config.metrics_window_size);

        if removed > 0 {
            debug!(component = %self.name, removed = removed, "Pruned expired call records");
        }
        removed
    }

    /// Start periodic maintenance; a no-op if already running
    pub fn start(self: &Arc<Self>) {
        let mut maintenance = self.maintenance.lock();
        if maintenance.is_some() {
            return;
        }

        let interval = self.config().monitoring_period;
        let breaker: Weak<CircuitBreaker> = Arc::downgrade(self);

        *maintenance = BackgroundTask::spawn_periodic(
            format!("{}-maintenance", self.name),
            interval,
            move || {
                let breaker = breaker.clone();
                async move {
                    if let Some(breaker) = breaker.upgrade() {
                        breaker.run_maintenance();
                        if breaker.config().enable_metrics {
                            breaker.metrics_collector.record_breaker_stats(&breaker.stats());
                        }
                    }
                }
            },
        );

        info!(component = %self.name, "Circuit breaker started");
    }

    /// Stop periodic maintenance
    pub fn stop(&self) {
        if let Some(task) = self.maintenance.lock().take() {
            task.cancel();
            info!(component = %self.name, "Circuit breaker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.maintenance.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, sleep};

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            volume_threshold: 3,
            error_percentage_threshold: 50.0,
            timeout: Duration::from_millis(100),
            reset_timeout: Duration::from_millis(1000),
            max_reset_timeout: Duration::from_millis(10_000),
            exponential_backoff: false,
            ..Default::default()
        }
    }

    async fn fail(circuit: &CircuitBreaker) -> Result<String, CircuitBreakerError<String>> {
        circuit
            .execute(|| async { Err::<String, _>("error".to_string()) }, CallContext::new())
            .await
    }

    async fn succeed(circuit: &CircuitBreaker) -> Result<String, CircuitBreakerError<String>> {
        circuit
            .execute(|| async { Ok::<_, String>("success".to_string()) }, CallContext::new())
            .await
    }

    #[tokio::test]
    async fn test_circuit_breaker_normal_operation() {
        let circuit = CircuitBreaker::new("test", test_config()).unwrap();

        // Should start in closed state
        assert_eq!(circuit.state(), CircuitState::Closed);

        // Successful operations should work
        let result = succeed(&circuit).await;
        assert_eq!(result.unwrap(), "success");

        let stats = circuit.stats();
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.successful_calls, 1);
        assert_eq!(stats.failed_calls, 0);
        assert_eq!(stats.window.total_calls, 1);
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_at_admission() {
        let circuit = CircuitBreaker::new("test", test_config()).unwrap();

        for _ in 0..3 {
            let result = fail(&circuit).await;
            assert!(matches!(result, Err(CircuitBreakerError::OperationFailed(_))));
        }

        // Failures alone never flip state; the next admission does
        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = succeed(&circuit).await;
        assert!(matches!(
            result,
            Err(CircuitBreakerError::CircuitOpen {
                state: CircuitState::Open,
                ..
            })
        ));
        assert_eq!(circuit.state(), CircuitState::Open);

        let stats = circuit.stats();
        assert_eq!(stats.rejected_calls, 1);
        assert_eq!(stats.total_calls, 3);
        assert!(stats.next_retry_time.is_some());
    }

    #[tokio::test]
    async fn test_volume_threshold_gates_opening() {
        let config = CircuitBreakerConfig {
            volume_threshold: 10,
            ..test_config()
        };
        let circuit = CircuitBreaker::new("test", config).unwrap();

        for _ in 0..5 {
            let _ = fail(&circuit).await;
        }

        assert!(matches!(
            fail(&circuit).await,
            Err(CircuitBreakerError::OperationFailed(_))
        ));
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failure_rate_opens_without_consecutive_failures() {
        let config = CircuitBreakerConfig {
            failure_threshold: 100,
            volume_threshold: 4,
            ..test_config()
        };
        let circuit = CircuitBreaker::new("test", config).unwrap();

        let _ = fail(&circuit).await;
        let _ = succeed(&circuit).await;
        let _ = fail(&circuit).await;
        let _ = succeed(&circuit).await;

        // 50% failure rate over 4 calls meets the threshold
        assert!(succeed(&circuit).await.is_err());
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_calls_open_circuit() {
        let config = CircuitBreakerConfig {
            slow_call_duration_threshold: Duration::from_millis(20),
            slow_call_rate_threshold: 50.0,
            volume_threshold: 2,
            ..test_config()
        };
        let circuit = CircuitBreaker::new("test", config).unwrap();

        for _ in 0..2 {
            let result = circuit
                .execute(
                    || async {
                        sleep(Duration::from_millis(30)).await;
                        Ok::<_, String>(())
                    },
                    CallContext::new(),
                )
                .await;
            assert!(result.is_ok());
        }

        assert_eq!(circuit.window_stats().slow_calls, 2);
        assert!(succeed(&circuit).await.is_err());
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_recovery() {
        let circuit = CircuitBreaker::new("test", test_config()).unwrap();

        for _ in 0..3 {
            let _ = fail(&circuit).await;
        }
        assert!(succeed(&circuit).await.is_err());
        assert_eq!(circuit.state(), CircuitState::Open);

        // Still inside the reset timeout
        advance(Duration::from_millis(500)).await;
        assert!(succeed(&circuit).await.is_err());
        assert_eq!(circuit.state(), CircuitState::Open);

        advance(Duration::from_millis(501)).await;

        // First admission after the retry time moves to half-open and is admitted
        assert!(succeed(&circuit).await.is_ok());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        // Closes exactly at success_threshold
        assert!(succeed(&circuit).await.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);

        let stats = circuit.stats();
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.window.total_calls, 0);
        assert!(stats.next_retry_time.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_on_next_admission() {
        let circuit = CircuitBreaker::new("test", test_config()).unwrap();

        for _ in 0..3 {
            let _ = fail(&circuit).await;
        }
        assert!(succeed(&circuit).await.is_err());

        advance(Duration::from_millis(1001)).await;

        // The trial call fails; the breaker records it and stays half-open
        assert!(matches!(
            fail(&circuit).await,
            Err(CircuitBreakerError::OperationFailed(_))
        ));
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        assert_eq!(circuit.stats().consecutive_failures, 4);

        // Consecutive failures are past the threshold, so the next admission re-opens
        assert!(matches!(
            succeed(&circuit).await,
            Err(CircuitBreakerError::CircuitOpen { .. })
        ));
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    async fn trip_and_await_retry(circuit: &CircuitBreaker) {
        for _ in 0..3 {
            let _ = fail(circuit).await;
        }
        assert!(succeed(circuit).await.is_err());
        advance(Duration::from_millis(1001)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_trial_calls_do_not_reopen() {
        let circuit = Arc::new(CircuitBreaker::new("test", test_config()).unwrap());
        trip_and_await_retry(&circuit).await;

        let trial = {
            let circuit = circuit.clone();
            tokio::spawn(async move {
                circuit
                    .execute(
                        || async {
                            sleep(Duration::from_millis(50)).await;
                            Ok::<_, String>("slow trial")
                        },
                        CallContext::new(),
                    )
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        // Admitted while the first trial is still in flight
        assert!(succeed(&circuit).await.is_ok());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        assert_eq!(trial.await.unwrap().unwrap(), "slow trial");
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_trial_failure_keeps_half_open() {
        let config = CircuitBreakerConfig {
            ignore_errors: vec!["not found".to_string()],
            ..test_config()
        };
        let circuit = CircuitBreaker::new("test", config).unwrap();
        trip_and_await_retry(&circuit).await;

        let result = circuit
            .execute(
                || async { Err::<(), _>("record not found".to_string()) },
                CallContext::new(),
            )
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::OperationFailed(_))));
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        assert!(succeed(&circuit).await.is_ok());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_trial_keeps_half_open() {
        let config = CircuitBreakerConfig {
            emergency_bypass: true,
            ..test_config()
        };
        let circuit = CircuitBreaker::new("test", config).unwrap();
        trip_and_await_retry(&circuit).await;

        let result = circuit
            .execute(|| async { Ok::<_, String>(()) }, CallContext::new().emergency())
            .await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        assert!(succeed(&circuit).await.is_ok());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_panicking_operation_is_recorded_then_resumed() {
        let circuit = Arc::new(CircuitBreaker::new("test", test_config()).unwrap());

        let caller = {
            let circuit = circuit.clone();
            tokio::spawn(async move {
                circuit
                    .execute(
                        || async {
                            if true {
                                panic!("operation blew up");
                            }
                            Ok::<(), String>(())
                        },
                        CallContext::new(),
                    )
                    .await
            })
        };

        let join_error = caller.await.unwrap_err();
        assert!(join_error.is_panic());

        let stats = circuit.stats();
        assert_eq!(stats.failed_calls, 1);
        assert_eq!(stats.consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_delays_retry() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            volume_threshold: 1,
            reset_timeout: Duration::from_millis(1000),
            max_reset_timeout: Duration::from_millis(10_000),
            exponential_backoff: true,
            backoff_multiplier: 2.0,
            ..test_config()
        };
        let circuit = CircuitBreaker::new("test", config).unwrap();

        let _ = fail(&circuit).await;
        assert!(succeed(&circuit).await.is_err());

        // One consecutive failure doubles the base reset timeout
        advance(Duration::from_millis(1500)).await;
        assert!(succeed(&circuit).await.is_err());
        assert_eq!(circuit.state(), CircuitState::Open);

        advance(Duration::from_millis(501)).await;
        assert!(succeed(&circuit).await.is_ok());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_force_operations() {
        let circuit = CircuitBreaker::new("test", test_config()).unwrap();

        // Force open
        circuit.force_open();
        assert_eq!(circuit.state(), CircuitState::ForcedOpen);
        for _ in 0..5 {
            assert!(matches!(
                succeed(&circuit).await,
                Err(CircuitBreakerError::CircuitOpen {
                    state: CircuitState::ForcedOpen,
                    ..
                })
            ));
        }

        // Force closed admits everything, even past every threshold
        circuit.force_close();
        for _ in 0..10 {
            assert!(matches!(
                fail(&circuit).await,
                Err(CircuitBreakerError::OperationFailed(_))
            ));
        }
        assert_eq!(circuit.state(), CircuitState::ForcedClosed);
        assert_eq!(circuit.stats().rejected_calls, 5);
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let circuit = CircuitBreaker::new("test", test_config()).unwrap();

        for _ in 0..3 {
            let _ = fail(&circuit).await;
        }
        assert!(succeed(&circuit).await.is_err());

        circuit.reset();

        let stats = circuit.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.consecutive_successes, 0);
        assert!(stats.next_retry_time.is_none());
        assert!(circuit.call_records().is_empty());
        // Lifetime counters survive a reset
        assert_eq!(stats.failed_calls, 3);

        circuit.force_open();
        circuit.reset();
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_discards_late_result() {
        let config = CircuitBreakerConfig {
            timeout: Duration::from_millis(50),
            ..test_config()
        };
        let circuit = CircuitBreaker::new("test", config).unwrap();

        let result = circuit
            .execute(
                || async {
                    sleep(Duration::from_millis(100)).await;
                    Ok::<_, String>("late")
                },
                CallContext::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(CircuitBreakerError::OperationTimeout { .. })
        ));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::OperationTimeout);

        // Let the detached operation finish
        sleep(Duration::from_millis(100)).await;

        let stats = circuit.stats();
        assert_eq!(stats.total_calls, 1);
        assert_eq!(stats.successful_calls, 0);
        assert_eq!(stats.failed_calls, 1);
        assert_eq!(stats.timeout_calls, 1);
        assert_eq!(stats.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_ignored_errors_are_not_recorded() {
        let config = CircuitBreakerConfig {
            ignore_errors: vec!["not found".to_string()],
            ..test_config()
        };
        let circuit = CircuitBreaker::new("test", config).unwrap();

        let result = circuit
            .execute(
                || async { Err::<(), _>("record not found".to_string()) },
                CallContext::new(),
            )
            .await;

        // The caller still sees the failure
        assert!(matches!(result, Err(CircuitBreakerError::OperationFailed(_))));

        let stats = circuit.stats();
        assert_eq!(stats.total_calls, 0);
        assert_eq!(stats.consecutive_failures, 0);
        assert!(circuit.call_records().is_empty());
    }

    #[tokio::test]
    async fn test_emergency_bypass_skips_statistics() {
        let config = CircuitBreakerConfig {
            emergency_bypass: true,
            ..test_config()
        };
        let circuit = CircuitBreaker::new("test", config).unwrap();

        let result = circuit
            .execute(
                || async { Ok::<_, String>("dispatched") },
                CallContext::for_operation("page_on_call").emergency(),
            )
            .await;
        assert_eq!(result.unwrap(), "dispatched");
        assert_eq!(circuit.stats().total_calls, 0);

        // Bypass never overrides a forced-open circuit
        circuit.force_open();
        let result = circuit
            .execute(|| async { Ok::<_, String>(()) }, CallContext::new().emergency())
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_emergency_flag_ignored_without_bypass() {
        let circuit = CircuitBreaker::new("test", test_config()).unwrap();

        let _ = circuit
            .execute(|| async { Ok::<_, String>(()) }, CallContext::new().emergency())
            .await;
        assert_eq!(circuit.stats().total_calls, 1);
    }

    #[test]
    fn test_execute_sync() {
        let circuit = CircuitBreaker::new("sync", test_config()).unwrap();

        for _ in 0..3 {
            let result = circuit.execute_sync(|| Err::<(), _>("boom".to_string()), CallContext::new());
            assert!(result.is_err());
        }

        let result = circuit.execute_sync(|| Ok::<_, String>(1), CallContext::new());
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_invalid_update_keeps_previous_config() {
        let circuit = CircuitBreaker::new("test", test_config()).unwrap();

        let invalid = CircuitBreakerConfig {
            failure_threshold: 0,
            ..test_config()
        };
        let err = circuit.update_config(invalid).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
        assert_eq!(circuit.config().failure_threshold, 3);

        let patch = CircuitBreakerConfigPatch {
            failure_threshold: Some(7),
            ..Default::default()
        };
        circuit.apply_patch(&patch).unwrap();
        assert_eq!(circuit.config().failure_threshold, 7);
        assert_eq!(circuit.config().success_threshold, 2);
    }

    #[tokio::test]
    async fn test_events_published_on_opening() {
        let publisher = EventPublisher::new(64);
        let mut events = publisher.subscribe();
        let circuit = CircuitBreaker::new("events", test_config())
            .unwrap()
            .with_publisher(publisher);

        for _ in 0..3 {
            let _ = fail(&circuit).await;
        }
        let _ = succeed(&circuit).await;

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
            if let BreakerEvent::StateChanged {
                old_state,
                new_state,
                ..
            } = event
            {
                assert_eq!(old_state, CircuitState::Closed);
                assert_eq!(new_state, CircuitState::Open);
            }
        }

        assert_eq!(
            names,
            vec!["operation", "operation", "operation", "threshold-exceeded", "state-changed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_maintenance() {
        let config = CircuitBreakerConfig {
            monitoring_period: Duration::from_secs(1),
            ..test_config()
        };
        let circuit = Arc::new(CircuitBreaker::new("maintained", config).unwrap());
        circuit.start();
        assert!(circuit.is_running());

        let _ = succeed(&circuit).await;
        assert_eq!(circuit.call_records().len(), 1);

        sleep(Duration::from_millis(2100)).await;
        assert!(circuit.call_records().is_empty());

        circuit.stop();
        assert!(!circuit.is_running());
    }
}
