#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Breaker Core
//!
//! Circuit breakers for protecting calls to unreliable dependencies.
//!
//! ## Overview
//!
//! Each [`CircuitBreaker`] watches the outcomes of the calls it protects over a
//! sliding time window. When failures or slow calls cross configured thresholds the
//! circuit opens and callers fail fast until a reset timeout (with optional
//! exponential backoff) elapses. A half-open trial phase then decides whether the
//! dependency has recovered.
//!
//! ## Key Features
//!
//! - **Five states**: CLOSED, OPEN, HALF_OPEN plus operator-forced FORCED_OPEN and FORCED_CLOSED
//! - **Sliding window**: failure rate, slow-call rate and latency percentiles over a bounded window
//! - **Recording policy**: ignore and record lists plus custom classifiers decide which failures count
//! - **Emergency bypass**: flagged calls skip protection when the breaker allows it
//! - **Health scoring**: per-breaker indicators, issues and recommendations, plus cascade risk
//! - **Managed registry**: templates, bulk administration and background sweeps
//! - **Events**: broadcast state changes, threshold breaches and health alerts
//!
//! ## Module Organization
//!
//! - [`resilience`] - Circuit breaker, manager, health and metrics
//! - [`config`] - Manager configuration and layered loading
//! - [`events`] - Breaker event types and publisher
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use breaker_core::config::ConfigLoader;
//! use breaker_core::resilience::{CallContext, CircuitBreakerManager};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! breaker_core::logging::init_structured_logging();
//!
//! let config = ConfigLoader::new().load()?;
//! let manager = Arc::new(CircuitBreakerManager::new(config)?);
//! manager.initialize()?;
//!
//! manager.create_from_template("patient_records", "healthcare", Default::default())?;
//!
//! let record = manager
//!     .execute_with_breaker(
//!         "patient_records",
//!         || async { Ok::<_, String>("record") },
//!         CallContext::for_operation("fetch_record"),
//!     )
//!     .await?;
//!
//! println!("{record}: {:?}", manager.global_health().status);
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod resilience;

pub use config::{ConfigLoader, ManagerConfig};
pub use error::{ErrorKind, ResilienceError, Result};
pub use events::{BreakerEvent, EventPublisher, EventSink};
pub use resilience::{
    CallContext, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigPatch,
    CircuitBreakerError, CircuitBreakerManager, CircuitState,
};
