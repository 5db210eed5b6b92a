//! Room-addressed event fan-out over the pub/sub channel.
//!
//! Workers publish `{room, event, data}` envelopes to one well-known NATS
//! subject. Every API process runs a single subscriber on that subject and
//! relays matching events into its local room registry, so a worker never
//! needs to know which process holds a given client session.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::nats::BusPublisher;

/// Subject carrying all room-addressed events for the process group.
pub const EVENTS_SUBJECT: &str = "socket.events";

/// Wire shape of a bus event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub room: String,
    pub event: String,
    pub data: Value,
}

/// Room for a generation's event stream.
pub fn generation_room(id: uuid::Uuid) -> String {
    format!("generation:{id}")
}

/// Publisher half of the event fabric.
///
/// Cheap to clone; publish failures are logged and swallowed — event
/// delivery is best-effort by contract.
#[derive(Clone)]
pub struct EventBus {
    publisher: Arc<dyn BusPublisher>,
}

impl EventBus {
    pub fn new(publisher: Arc<dyn BusPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish an event to a room. Fire-and-forget.
    pub async fn publish(&self, room: &str, event: &str, data: Value) {
        let envelope = BusEvent {
            room: room.to_string(),
            event: event.to_string(),
            data,
        };

        if let Err(e) = self.try_publish(&envelope).await {
            warn!(room = %envelope.room, event = %envelope.event, error = %e, "event publish failed");
        }
    }

    async fn try_publish(&self, envelope: &BusEvent) -> Result<()> {
        let payload = serde_json::to_vec(envelope)?;
        self.publisher
            .publish(EVENTS_SUBJECT.to_string(), payload.into())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::nats::TestBus;
    use serde_json::json;

    #[tokio::test]
    async fn publishes_room_envelope_to_events_subject() {
        let bus = Arc::new(TestBus::new());
        let events = EventBus::new(bus.clone());
        let id = uuid::Uuid::new_v4();

        events
            .publish(&generation_room(id), "generation:log", json!({"x": 1}))
            .await;

        let messages = bus.messages_for_subject(EVENTS_SUBJECT);
        assert_eq!(messages.len(), 1);

        let event: BusEvent = bus.deserialize_message(&messages[0]).unwrap();
        assert_eq!(event.room, format!("generation:{id}"));
        assert_eq!(event.event, "generation:log");
        assert_eq!(event.data["x"], 1);
    }

    #[test]
    fn room_label_shape() {
        let id = uuid::Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            generation_room(id),
            "generation:550e8400-e29b-41d4-a716-446655440000"
        );
    }
}
