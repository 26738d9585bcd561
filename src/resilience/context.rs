//! Per-call context passed alongside a protected operation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Caller-supplied information about a single protected call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallContext {
    /// Safety-critical call; may skip the breaker when emergency bypass is enabled
    pub is_emergency: bool,
    /// Operation label used in events and logs
    pub operation: Option<String>,
    pub request_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_operation(operation: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            ..Self::default()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn emergency(mut self) -> Self {
        self.is_emergency = true;
        self
    }

    pub fn operation_name(&self) -> &str {
        self.operation.as_deref().unwrap_or("execute")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_methods() {
        let ctx = CallContext::for_operation("fetch_patient")
            .with_request_id("req-1")
            .with_metadata("ward", "icu")
            .emergency();

        assert!(ctx.is_emergency);
        assert_eq!(ctx.operation_name(), "fetch_patient");
        assert_eq!(ctx.request_id.as_deref(), Some("req-1"));
        assert_eq!(ctx.metadata.get("ward").map(String::as_str), Some("icu"));
        assert_eq!(CallContext::new().operation_name(), "execute");
    }
}
