//! Collaborator ports consumed by the core.
//!
//! Everything network-bound lives behind one of these traits: the
//! application directory, the audit log, the message store, the object
//! store, and the push channel. Implementations decide where the data
//! actually lives; the core only relies on the contracts below.

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use uuid::Uuid;

use anteroom_types::events::ChangeEvent;
use anteroom_types::models::{
    ApplicationRequest, ApplicationStatus, ConversationKey, Message, NewMessage, PublicIdentity,
    Role,
};

use crate::error::PortalResult;

/// User and application-request lookups.
pub trait Directory: Send + Sync {
    /// The user's application request, if they have submitted one.
    fn request_by_user(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'_, PortalResult<Option<ApplicationRequest>>>;

    fn user_by_id(&self, user_id: Uuid) -> BoxFuture<'_, PortalResult<Option<PublicIdentity>>>;

    fn users_by_role(&self, role: Role) -> BoxFuture<'_, PortalResult<Vec<PublicIdentity>>>;

    /// All requests currently in one of the given statuses.
    fn requests_with_status(
        &self,
        statuses: &[ApplicationStatus],
    ) -> BoxFuture<'_, PortalResult<Vec<ApplicationRequest>>>;
}

/// Access-decision audit trail, read-only from this side.
pub trait AuditLog: Send + Sync {
    /// The most recent recorded reason for the user, by access time
    /// descending. `None` when the user has no audit records.
    fn latest_access_reason(&self, user_id: Uuid) -> BoxFuture<'_, PortalResult<Option<String>>>;
}

pub trait MessageStore: Send + Sync {
    fn list_messages(&self, key: ConversationKey) -> BoxFuture<'_, PortalResult<Vec<Message>>>;

    /// Persist a message. The store assigns the durable id and timestamp
    /// and returns the stored row.
    fn insert_message(&self, msg: NewMessage) -> BoxFuture<'_, PortalResult<Message>>;
}

pub trait ObjectStore: Send + Sync {
    /// Upload binary content under `name`, returning a durable handle.
    fn upload(&self, name: &str, bytes: Vec<u8>) -> BoxFuture<'_, PortalResult<String>>;
}

/// Server-push change feed.
///
/// Subscribing yields a broadcast receiver carrying every change the
/// backend observes; dropping the receiver unsubscribes. Scoping to a
/// conversation happens at the consumer via [`ChangeEvent::conversation_key`].
pub trait PushChannel: Send + Sync {
    fn subscribe(&self) -> PortalResult<broadcast::Receiver<ChangeEvent>>;
}
