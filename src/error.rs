//! Error types for the breaker subsystem.
//!
//! Administrative operations (creating breakers, updating configuration, lookups)
//! return [`ResilienceError`]. Protected executions return
//! [`CircuitBreakerError`](crate::resilience::CircuitBreakerError), which also
//! carries the error produced by the wrapped operation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResilienceError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Circuit breaker not found: {0}")]
    BreakerNotFound(String),
    #[error("Emergency code rejected for circuit breaker {0}")]
    EmergencyCodeRejected(String),
}

impl ResilienceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::ConfigurationError(_) => ErrorKind::ConfigurationError,
            ResilienceError::BreakerNotFound(_) => ErrorKind::BreakerNotFound,
            ResilienceError::EmergencyCodeRejected(_) => ErrorKind::EmergencyCodeRejected,
        }
    }
}

impl From<crate::config::ConfigurationError> for ResilienceError {
    fn from(error: crate::config::ConfigurationError) -> Self {
        ResilienceError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Stable, transport-friendly classification of every error the subsystem surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    CircuitOpen,
    OperationTimeout,
    OperationFailed,
    ConfigurationError,
    BreakerNotFound,
    EmergencyCodeRejected,
}

impl ErrorKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            ErrorKind::CircuitOpen => "CIRCUIT_OPEN",
            ErrorKind::OperationTimeout => "OPERATION_TIMEOUT",
            ErrorKind::OperationFailed => "OPERATION_FAILED",
            ErrorKind::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorKind::BreakerNotFound => "BREAKER_NOT_FOUND",
            ErrorKind::EmergencyCodeRejected => "EMERGENCY_CODE_REJECTED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_code())
    }
}
