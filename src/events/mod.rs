pub mod publisher;
pub mod types;

// Re-export key types for convenience
pub use publisher::{EventPublisher, EventSink, PublishError, TracingEventSink};
pub use types::{BreakerEvent, ThresholdType};
