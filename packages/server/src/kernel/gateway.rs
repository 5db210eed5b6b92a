//! Subscription gateway: per-process room registry plus the bus relay.
//!
//! Client sessions (WebSocket handlers) register an outbound channel per
//! room they join. The single bus subscriber in each API process hands
//! every received event to the registry, which fans it out to the sessions
//! currently in that room. Room labels carry no principal; token validity
//! at connect time is the only authorization.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::event_bus::{BusEvent, EVENTS_SUBJECT};

/// Outbound channel to one connected session.
pub type SessionSender = mpsc::UnboundedSender<BusEvent>;

/// Room membership for one API process.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<String, HashMap<Uuid, SessionSender>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a session to a room.
    pub async fn join(&self, room: &str, session_id: Uuid, sender: SessionSender) {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_default()
            .insert(session_id, sender);
        debug!(room = %room, session = %session_id, "session joined room");
    }

    /// Remove a session from one room.
    pub async fn leave(&self, room: &str, session_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&session_id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
        debug!(room = %room, session = %session_id, "session left room");
    }

    /// Remove a session from every room (disconnect).
    pub async fn remove_session(&self, session_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&session_id);
            !members.is_empty()
        });
    }

    /// Deliver one bus event to every member of its room. Dead channels
    /// are dropped on the way.
    pub async fn dispatch(&self, event: &BusEvent) {
        let mut dead: Vec<Uuid> = Vec::new();
        {
            let rooms = self.rooms.read().await;
            let Some(members) = rooms.get(&event.room) else {
                return;
            };
            for (session_id, sender) in members {
                if sender.send(event.clone()).is_err() {
                    dead.push(*session_id);
                }
            }
        }

        for session_id in dead {
            self.leave(&event.room, session_id).await;
        }
    }

    /// Number of sessions currently in a room.
    pub async fn room_size(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

/// Long-lived bus subscriber for one API process.
///
/// Subscribes to the shared events subject and relays every decodable
/// message into the local registry.
pub async fn run_bus_relay(
    client: async_nats::Client,
    registry: RoomRegistry,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut subscription = client.subscribe(EVENTS_SUBJECT).await?;
    info!(subject = EVENTS_SUBJECT, "bus relay subscribed");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            message = subscription.next() => {
                let Some(message) = message else { break };
                match serde_json::from_slice::<BusEvent>(&message.payload) {
                    Ok(event) => registry.dispatch(&event).await,
                    Err(e) => warn!(error = %e, "undecodable bus event dropped"),
                }
            }
        }
    }

    info!("bus relay stopped");
    Ok(())
}
