//! Delivery of decoded inbound events to the rest of the application.

use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of a [`BroadcastSink`].
pub const DEFAULT_SINK_CAPACITY: usize = 256;

/// Out-of-band event forwarded by the channel.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum InboundEvent {
    /// A `metrics_update` frame, forwarded verbatim.
    MetricsUpdate(serde_json::Value),
}

impl InboundEvent {
    /// Wire type of the frame that produced this event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MetricsUpdate(_) => "metrics_update",
        }
    }

    /// The original frame.
    #[must_use]
    pub fn frame(&self) -> &serde_json::Value {
        match self {
            Self::MetricsUpdate(frame) => frame,
        }
    }
}

/// Consumer of inbound events. The channel makes no assumption about how
/// events are consumed.
pub trait MessageSink: Send + Sync {
    /// Deliver one event.
    fn deliver(&self, event: InboundEvent);
}

/// Sink that fans events out to any number of async subscribers.
///
/// Delivery is best-effort; lagged subscribers are handled by `broadcast`.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<InboundEvent>,
}

impl BroadcastSink {
    /// Create a sink with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SINK_CAPACITY)
    }

    /// Create a sink with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to delivered events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSink for BroadcastSink {
    fn deliver(&self, event: InboundEvent) {
        let event_type = event.event_type();
        if self.sender.send(event).is_err() {
            trace!(event_type, "No subscribers for inbound event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fans_out_to_subscribers() {
        let sink = BroadcastSink::new();
        let mut a = sink.subscribe();
        let mut b = sink.subscribe();

        sink.deliver(InboundEvent::MetricsUpdate(serde_json::json!({"type": "metrics_update"})));

        let event_a = a.recv().await.unwrap();
        let event_b = b.recv().await.unwrap();
        assert_eq!(event_a, event_b);
        assert_eq!(event_a.event_type(), "metrics_update");
    }

    #[test]
    fn deliver_without_subscribers_is_silent() {
        let sink = BroadcastSink::with_capacity(0);
        sink.deliver(InboundEvent::MetricsUpdate(serde_json::Value::Null));
    }

    #[test]
    fn frame_accessor_returns_original() {
        let frame = serde_json::json!({"type": "metrics_update", "data": {"queue": 3}});
        let event = InboundEvent::MetricsUpdate(frame.clone());
        assert_eq!(event.frame(), &frame);
    }
}
