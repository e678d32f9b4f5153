use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session role, resolved once at login and carried explicitly from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicIdentity {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    None,
    Pending,
    Approved,
    Rejected,
}

/// A user's membership application. At most one exists per user; it is
/// created and mutated by the admin side and only ever observed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRequest {
    pub user_id: Uuid,
    pub status: ApplicationStatus,
    /// Present only when `status` is `Rejected`.
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Local delivery state of a message. Never persisted; the store only ever
/// holds confirmed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryState {
    Pending,
    #[default]
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    /// May be empty when an attachment is present.
    pub content: String,
    pub attachment_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub delivery: DeliveryState,
}

impl Message {
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(self.sender_id, self.receiver_id)
    }
}

/// A message as handed to the store for insertion. The store assigns the
/// durable id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub attachment_url: Option<String>,
}

/// Unordered participant pair identifying a conversation. Normalized on
/// construction so `(a, b)` and `(b, a)` compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    low: Uuid,
    high: Uuid,
}

impl ConversationKey {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn low(&self) -> Uuid {
        self.low
    }

    pub fn high(&self) -> Uuid {
        self.high
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.low == id || self.high == id
    }
}

/// Total display order for messages: ascending `created_at`, ties broken by
/// id (uuid byte order, i.e. lexicographic on the canonical form). Every
/// sort and merge of a conversation uses this, so rendering order is
/// deterministic regardless of arrival order.
pub fn display_order(a: &Message, b: &Message) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}
