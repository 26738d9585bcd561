use crate::events::types::BreakerEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Fire-and-forget publisher for breaker events
///
/// Publishing never blocks: events go onto a bounded broadcast channel and slow
/// subscribers observe a lag instead of applying back-pressure.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<BreakerEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event, returning how many subscribers received it
    ///
    /// Sending with no live subscribers drops the event and returns 0.
    pub fn publish(&self, event: BreakerEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!(event = event.name(), "No subscribers, event dropped");
                0
            }
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Forward every subsequent event to `sink` on a dedicated task
    ///
    /// The task ends once every publisher handle is dropped.
    pub fn spawn_notifier(&self, sink: Arc<dyn EventSink>) -> JoinHandle<()> {
        let mut receiver = self.subscribe();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = sink.handle(&event).await {
                            warn!(event = event.name(), error = %e, "Event sink failed to handle event");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Event notifier lagged behind, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event channel closed, notifier exiting");
                        break;
                    }
                }
            }
        })
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000) // Default capacity of 1000 events
    }
}

/// Consumer of breaker events, driven by the notifier task
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle(&self, event: &BreakerEvent) -> Result<(), PublishError>;
}

/// Sink that writes every event as a structured log record
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn handle(&self, event: &BreakerEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event)?;

        match event {
            BreakerEvent::StateChanged { new_state, .. } if new_state.is_rejecting() => {
                error!(event = event.name(), payload = %payload, "Breaker event");
            }
            BreakerEvent::StateChanged { .. } => {
                info!(event = event.name(), payload = %payload, "Breaker event");
            }
            BreakerEvent::Operation { .. } => {
                debug!(event = event.name(), payload = %payload, "Breaker event");
            }
            BreakerEvent::ThresholdExceeded { .. } => {
                warn!(event = event.name(), payload = %payload, "Breaker event");
            }
            BreakerEvent::EmergencyBypass { .. } => {
                warn!(target: "breaker_core::audit", event = event.name(), payload = %payload, "Breaker event");
            }
            BreakerEvent::HealthAlert { .. } => {
                error!(event = event.name(), payload = %payload, "Breaker event");
            }
        }

        Ok(())
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Event sink error: {0}")]
    Sink(String),
}
