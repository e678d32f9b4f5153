use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ConversationKey;

/// Change notifications delivered over the push channel.
///
/// Payload granularity is deliberately thin: consumers treat every event as
/// a trigger to re-fetch the affected conversation rather than patching
/// local state from the payload, since partial or duplicated deliveries are
/// indistinguishable at the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChangeEvent {
    /// A new message row was persisted
    MessageInsert {
        id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
    },

    /// An existing message row changed
    MessageUpdate {
        id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
    },

    /// A message row was removed
    MessageDelete {
        id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
    },
}

impl ChangeEvent {
    /// The conversation this event is scoped to.
    pub fn conversation_key(&self) -> ConversationKey {
        match self {
            Self::MessageInsert { sender_id, receiver_id, .. }
            | Self::MessageUpdate { sender_id, receiver_id, .. }
            | Self::MessageDelete { sender_id, receiver_id, .. } => {
                ConversationKey::new(*sender_id, *receiver_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_scoping_ignores_direction() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let insert = ChangeEvent::MessageInsert {
            id: Uuid::from_u128(10),
            sender_id: a,
            receiver_id: b,
        };
        let reply = ChangeEvent::MessageInsert {
            id: Uuid::from_u128(11),
            sender_id: b,
            receiver_id: a,
        };
        assert_eq!(insert.conversation_key(), reply.conversation_key());
    }

    #[test]
    fn events_round_trip_as_tagged_json() {
        let event = ChangeEvent::MessageDelete {
            id: Uuid::from_u128(5),
            sender_id: Uuid::from_u128(1),
            receiver_id: Uuid::from_u128(2),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"MessageDelete\""));
        let back: ChangeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.conversation_key(), event.conversation_key());
    }
}
