//! Failure classification
//!
//! Decides whether a failed call should count toward the breaker's statistics.
//! The policy is evaluated in order:
//!
//! 1. any `ignore_errors` match suppresses recording entirely
//! 2. a non-empty `record_errors` allow-list records only matches
//! 3. otherwise the optional [`FailureClassifier`] decides
//! 4. by default every failure is recorded
//!
//! A matcher entry matches an error when it equals the error's short type name
//! (`DbError` for `my_app::db::DbError`) or appears in its display message.

use crate::resilience::config::CircuitBreakerConfig;
use std::any::Any;
use std::fmt;
use std::time::Duration;

/// Context handed to classifiers when a protected call fails
#[derive(Debug)]
pub struct FailureContext<'a> {
    pub circuit_name: &'a str,
    /// The error value, downcastable to the operation's concrete error type
    pub error: &'a dyn Any,
    /// Short type name of the error
    pub error_type: &'a str,
    /// Display rendering of the error
    pub message: &'a str,
    /// How long the failed call ran
    pub duration: Duration,
}

impl FailureContext<'_> {
    /// True when `pattern` names the error type or appears in its message
    pub fn matches(&self, pattern: &str) -> bool {
        self.error_type == pattern || self.message.contains(pattern)
    }
}

/// Decides whether a failure should be recorded
pub trait FailureClassifier: Send + Sync + fmt::Debug {
    fn should_record(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Records every failure
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_record(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Classifier backed by a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_record(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

/// Error value recorded when a call loses the timeout race
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimeout {
    pub timeout: Duration,
}

impl fmt::Display for OperationTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation timed out after {}ms", self.timeout.as_millis())
    }
}

/// Apply the recording policy of `config` to a failure
pub fn should_record(config: &CircuitBreakerConfig, ctx: &FailureContext<'_>) -> bool {
    if config.ignore_errors.iter().any(|pattern| ctx.matches(pattern)) {
        return false;
    }

    if !config.record_errors.is_empty() {
        return config.record_errors.iter().any(|pattern| ctx.matches(pattern));
    }

    match &config.error_filter {
        Some(classifier) => classifier.should_record(ctx),
        None => true,
    }
}

/// Last path segment of a type name with generic arguments removed
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
