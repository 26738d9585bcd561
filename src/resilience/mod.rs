//! # Resilience Module
//!
//! Circuit breakers that isolate failing dependencies and keep callers from
//! piling onto them.
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: five-state machine with sliding-window failure and slow-call
//!   detection, exponential reset backoff and emergency bypass
//! - **Manager**: named registry with templates, bulk administration, global
//!   statistics, health aggregation and background sweeps
//! - **Health**: per-breaker indicators and rules, system-wide cascade risk
//!
//! ## Usage
//!
//! ```rust,no_run
//! use breaker_core::resilience::{CallContext, CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     timeout: Duration::from_secs(2),
//!     ..Default::default()
//! };
//!
//! let circuit_breaker = CircuitBreaker::new("database_operations", config)?;
//!
//! let rows = circuit_breaker
//!     .execute(|| async { Ok::<_, String>(42) }, CallContext::new())
//!     .await?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod circuit_breaker;
pub mod classifier;
pub mod config;
pub mod context;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod templates;
pub mod window;

pub use background::BackgroundTask;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use classifier::{
    DefaultClassifier, FailureClassifier, FailureContext, OperationTimeout, PredicateClassifier,
};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigPatch};
pub use context::CallContext;
pub use health::{
    BreakerHealth, CascadeRisk, GlobalHealth, GlobalHealthStatus, HealthIndicator,
    HealthIndicators, HealthStatus, IndicatorStatus,
};
pub use manager::{
    BreakerSummary, BulkItemResult, BulkOperation, BulkOperationRequest, BulkOperationResult,
    CircuitBreakerManager,
};
pub use metrics::{
    CircuitBreakerStats, FailingBreaker, GlobalStats, MetricsCollector, TracingMetricsCollector,
    WindowStats,
};
pub use templates::TemplateCatalog;
pub use window::{CallRecord, SlidingWindow};
