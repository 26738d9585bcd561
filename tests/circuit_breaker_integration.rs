//! Integration tests for a single circuit breaker: full recovery cycle, reset
//! backoff, timeouts, recording policy, emergency bypass and event ordering.

use breaker_core::events::{BreakerEvent, EventPublisher, ThresholdType};
use breaker_core::resilience::{
    CallContext, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    FailureContext, PredicateClassifier,
};
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::advance;
use tokio_test::{assert_err, assert_ok};

fn lifecycle_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        volume_threshold: 3,
        timeout: Duration::from_millis(100),
        reset_timeout: Duration::from_millis(1000),
        max_reset_timeout: Duration::from_millis(10_000),
        exponential_backoff: false,
        ..Default::default()
    }
}

async fn call(breaker: &CircuitBreaker, ok: bool) -> Result<(), CircuitBreakerError<String>> {
    breaker
        .execute(
            move || async move {
                if ok {
                    Ok(())
                } else {
                    Err("dependency unavailable".to_string())
                }
            },
            CallContext::for_operation("lookup"),
        )
        .await
}

#[derive(Debug)]
struct HttpError {
    status: u16,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}", self.status)
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_recovery_cycle() {
    let breaker = CircuitBreaker::new("inventory", lifecycle_config()).unwrap();

    for _ in 0..3 {
        assert_err!(call(&breaker, false).await);
    }

    // Next admission opens the circuit and rejects
    let rejected = call(&breaker, true).await.unwrap_err();
    assert!(matches!(rejected, CircuitBreakerError::CircuitOpen { .. }));
    assert_eq!(breaker.state(), CircuitState::Open);

    advance(Duration::from_millis(999)).await;
    assert_err!(call(&breaker, true).await);
    assert_eq!(breaker.state(), CircuitState::Open);

    advance(Duration::from_millis(2)).await;
    assert_ok!(call(&breaker, true).await);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    assert_ok!(call(&breaker, true).await);
    assert_eq!(breaker.state(), CircuitState::Closed);

    let stats = breaker.stats();
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(stats.next_retry_time, None);
    // Closing after recovery starts a fresh window
    assert_eq!(stats.window.total_calls, 0);
    assert_eq!(stats.total_calls, 5);
    assert_eq!(stats.rejected_calls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_reopens_with_longer_backoff() {
    let config = CircuitBreakerConfig {
        reset_timeout: Duration::from_millis(100),
        max_reset_timeout: Duration::from_millis(10_000),
        exponential_backoff: true,
        backoff_multiplier: 2.0,
        ..lifecycle_config()
    };
    let breaker = CircuitBreaker::new("payments", config).unwrap();

    for _ in 0..3 {
        let _ = call(&breaker, false).await;
    }
    assert_err!(call(&breaker, true).await);
    assert_eq!(breaker.state(), CircuitState::Open);

    // Three consecutive failures: 100ms * 2^3
    advance(Duration::from_millis(700)).await;
    assert_err!(call(&breaker, true).await);
    advance(Duration::from_millis(101)).await;

    // Trial call fails
    assert_err!(call(&breaker, false).await);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // The following admission re-opens: 100ms * 2^4
    let rejected = call(&breaker, true).await.unwrap_err();
    assert!(matches!(
        rejected,
        CircuitBreakerError::CircuitOpen {
            state: CircuitState::Open,
            ..
        }
    ));

    advance(Duration::from_millis(1500)).await;
    assert_err!(call(&breaker, true).await);
    advance(Duration::from_millis(101)).await;
    assert_ok!(call(&breaker, true).await);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_count_as_failures() {
    let breaker = CircuitBreaker::new("slow-service", lifecycle_config()).unwrap();

    let result = breaker
        .execute(
            || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, String>("late")
            },
            CallContext::new(),
        )
        .await;

    match result {
        Err(CircuitBreakerError::OperationTimeout { component, timeout }) => {
            assert_eq!(component, "slow-service");
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    let stats = breaker.stats();
    assert_eq!(stats.timeout_calls, 1);
    assert_eq!(stats.failed_calls, 1);
    assert_eq!(stats.consecutive_failures, 1);

    let records = breaker.call_records();
    assert_eq!(records.len(), 1);
    assert!(records[0]
        .error
        .as_deref()
        .unwrap()
        .contains("timed out after 100ms"));
}

#[tokio::test]
async fn test_timeouts_can_be_ignored() {
    let config = CircuitBreakerConfig {
        ignore_errors: vec!["OperationTimeout".to_string()],
        timeout: Duration::from_millis(10),
        ..lifecycle_config()
    };
    let breaker = CircuitBreaker::new("batch", config).unwrap();

    let result = breaker
        .execute(
            || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, String>(())
            },
            CallContext::new(),
        )
        .await;

    assert!(matches!(result, Err(CircuitBreakerError::OperationTimeout { .. })));
    assert_eq!(breaker.stats().total_calls, 0);
}

#[tokio::test]
async fn test_ignored_failures_leave_no_trace() {
    let config = CircuitBreakerConfig {
        ignore_errors: vec!["Validation".to_string()],
        ..lifecycle_config()
    };
    let breaker = CircuitBreaker::new("forms", config).unwrap();

    for _ in 0..10 {
        let result = breaker
            .execute(
                || async { Err::<(), _>("Validation failed: missing field".to_string()) },
                CallContext::new(),
            )
            .await;
        // The caller still sees the failure
        assert!(matches!(result, Err(CircuitBreakerError::OperationFailed(_))));
    }

    let stats = breaker.stats();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(stats.total_calls, 0);
    assert_eq!(stats.consecutive_failures, 0);
    assert!(breaker.call_records().is_empty());
}

#[tokio::test]
async fn test_record_list_matches_error_type() {
    let config = CircuitBreakerConfig {
        record_errors: vec!["HttpError".to_string()],
        ..lifecycle_config()
    };
    let breaker = CircuitBreaker::new("gateway", config).unwrap();

    let _ = breaker
        .execute(|| async { Err::<(), _>(HttpError { status: 502 }) }, CallContext::new())
        .await;
    let _ = breaker
        .execute(|| async { Err::<(), _>("socket closed".to_string()) }, CallContext::new())
        .await;

    let stats = breaker.stats();
    assert_eq!(stats.failed_calls, 1);
    assert_eq!(breaker.call_records()[0].error.as_deref(), Some("HTTP 502"));
}

#[tokio::test]
async fn test_error_filter_sees_concrete_error() {
    let config = CircuitBreakerConfig {
        error_filter: Some(Arc::new(PredicateClassifier::new(|ctx: &FailureContext<'_>| {
            ctx.error
                .downcast_ref::<HttpError>()
                .map_or(true, |error| error.status >= 500)
        }))),
        ..lifecycle_config()
    };
    let breaker = CircuitBreaker::new("catalog", config).unwrap();

    for status in [404, 409, 503] {
        let _ = breaker
            .execute(move || async move { Err::<(), _>(HttpError { status }) }, CallContext::new())
            .await;
    }

    let stats = breaker.stats();
    assert_eq!(stats.failed_calls, 1);
    assert_eq!(stats.consecutive_failures, 1);
}

#[tokio::test]
async fn test_emergency_bypass_is_audited_but_not_counted() {
    let publisher = EventPublisher::new(64);
    let mut events = publisher.subscribe();
    let config = CircuitBreakerConfig {
        emergency_bypass: true,
        ..lifecycle_config()
    };
    let breaker = CircuitBreaker::new("pharmacy", config)
        .unwrap()
        .with_publisher(publisher);

    let value = breaker
        .execute(
            || async { Ok::<_, String>("dispensed") },
            CallContext::for_operation("dispense")
                .with_request_id("req-42")
                .emergency(),
        )
        .await;
    assert_eq!(assert_ok!(value), "dispensed");
    assert_eq!(breaker.stats().total_calls, 0);

    match events.try_recv().unwrap() {
        BreakerEvent::EmergencyBypass {
            breaker_name,
            operation,
            request_id,
            ..
        } => {
            assert_eq!(breaker_name, "pharmacy");
            assert_eq!(operation, "dispense");
            assert_eq!(request_id.as_deref(), Some("req-42"));
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Forced-open rejects emergencies too
    breaker.force_open();
    let rejected = breaker
        .execute(|| async { Ok::<_, String>(()) }, CallContext::new().emergency())
        .await;
    assert!(matches!(
        rejected,
        Err(CircuitBreakerError::CircuitOpen {
            state: CircuitState::ForcedOpen,
            ..
        })
    ));
}

#[tokio::test]
async fn test_threshold_event_precedes_state_change() {
    let publisher = EventPublisher::new(64);
    let mut events = publisher.subscribe();
    let breaker = CircuitBreaker::new("search", lifecycle_config())
        .unwrap()
        .with_publisher(publisher);

    for _ in 0..3 {
        let _ = call(&breaker, false).await;
    }
    let _ = call(&breaker, true).await;

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if !matches!(event, BreakerEvent::Operation { .. }) {
            transitions.push(event);
        }
    }

    assert_eq!(transitions.len(), 2);
    assert!(matches!(
        &transitions[0],
        BreakerEvent::ThresholdExceeded {
            threshold_type: ThresholdType::FailureRate,
            ..
        }
    ));
    match &transitions[1] {
        BreakerEvent::StateChanged {
            old_state,
            new_state,
            stats,
            ..
        } => {
            assert_eq!(*old_state, CircuitState::Closed);
            assert_eq!(*new_state, CircuitState::Open);
            assert_eq!(stats.state, CircuitState::Open);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_forced_states_and_reset() {
    let breaker = CircuitBreaker::new("ledger", lifecycle_config()).unwrap();

    breaker.force_close();
    for _ in 0..10 {
        let _ = call(&breaker, false).await;
    }
    // Forced closed admits everything regardless of the window
    assert_ok!(call(&breaker, true).await);
    assert_eq!(breaker.state(), CircuitState::ForcedClosed);

    breaker.reset();
    let stats = breaker.stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(stats.window.total_calls, 0);
    // Lifetime counters survive a reset
    assert_eq!(stats.total_calls, 11);
}

#[tokio::test]
async fn test_concurrent_calls_share_one_state() {
    let breaker = CircuitBreaker::new("shared", lifecycle_config()).unwrap();

    let results = join_all((0..20).map(|_| call(&breaker, true))).await;
    for result in results {
        assert_ok!(result);
    }

    let stats = breaker.stats();
    assert_eq!(stats.total_calls, 20);
    assert_eq!(stats.successful_calls, 20);
    assert_eq!(stats.consecutive_successes, 20);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_concurrent_trials() {
    let breaker = CircuitBreaker::new("fanout", lifecycle_config()).unwrap();

    for _ in 0..3 {
        let _ = call(&breaker, false).await;
    }
    assert_err!(call(&breaker, true).await);
    advance(Duration::from_millis(1001)).await;

    let slow_trial = || async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok::<_, String>(())
    };
    let results = join_all(
        (0..3).map(|_| breaker.execute(slow_trial, CallContext::for_operation("trial"))),
    )
    .await;

    for result in results {
        assert_ok!(result);
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.stats().rejected_calls, 1);
}
