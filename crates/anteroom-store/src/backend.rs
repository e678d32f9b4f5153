//! SQLite-backed implementation of the core collaborator ports.
//!
//! Blocking rusqlite work runs under `spawn_blocking`; rows are converted
//! to domain types here, with corrupt rows logged and skipped. Message
//! inserts publish a change event after the write commits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use anteroom_core::error::{PortalError, PortalResult};
use anteroom_core::ports::{AuditLog, Directory, MessageStore, ObjectStore, PushChannel};
use anteroom_types::events::ChangeEvent;
use anteroom_types::models::{
    ApplicationRequest, ApplicationStatus, ConversationKey, DeliveryState, Message, NewMessage,
    PublicIdentity, Role,
};

use crate::Database;
use crate::dispatcher::ChangeDispatcher;
use crate::models::{MessageRow, RequestRow, UserRow};
use crate::storage::FileObjectStore;

pub fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::Admin => "admin",
        Role::Member => "member",
    }
}

fn parse_role(s: &str) -> Option<Role> {
    match s {
        "admin" => Some(Role::Admin),
        "member" => Some(Role::Member),
        _ => None,
    }
}

pub fn status_to_str(status: ApplicationStatus) -> &'static str {
    match status {
        ApplicationStatus::None => "none",
        ApplicationStatus::Pending => "pending",
        ApplicationStatus::Approved => "approved",
        ApplicationStatus::Rejected => "rejected",
    }
}

fn parse_status(s: &str) -> Option<ApplicationStatus> {
    match s {
        "none" => Some(ApplicationStatus::None),
        "pending" => Some(ApplicationStatus::Pending),
        "approved" => Some(ApplicationStatus::Approved),
        "rejected" => Some(ApplicationStatus::Rejected),
        _ => None,
    }
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn user_from_row(row: UserRow) -> Option<PublicIdentity> {
    let parsed = (|| {
        Some(PublicIdentity {
            id: row.id.parse().ok()?,
            username: row.username.clone(),
            role: parse_role(&row.role)?,
            created_at: parse_ts(&row.created_at)?,
        })
    })();
    if parsed.is_none() {
        warn!("Corrupt user row '{}', skipping", row.id);
    }
    parsed
}

fn request_from_row(row: RequestRow) -> Option<ApplicationRequest> {
    let parsed = (|| {
        Some(ApplicationRequest {
            user_id: row.user_id.parse().ok()?,
            status: parse_status(&row.status)?,
            rejection_reason: row.rejection_reason.clone(),
            created_at: parse_ts(&row.created_at)?,
        })
    })();
    if parsed.is_none() {
        warn!("Corrupt application request row for user '{}', skipping", row.user_id);
    }
    parsed
}

fn message_from_row(row: MessageRow) -> Option<Message> {
    let parsed = (|| {
        Some(Message {
            id: row.id.parse().ok()?,
            sender_id: row.sender_id.parse().ok()?,
            receiver_id: row.receiver_id.parse().ok()?,
            content: row.content.clone(),
            attachment_url: row.attachment_url.clone(),
            created_at: parse_ts(&row.created_at)?,
            delivery: DeliveryState::Confirmed,
        })
    })();
    if parsed.is_none() {
        warn!("Corrupt message row '{}', skipping", row.id);
    }
    parsed
}

/// All collaborator ports over one SQLite database, a change dispatcher,
/// and a filesystem object store.
pub struct SqliteBackend {
    db: Arc<Database>,
    dispatcher: ChangeDispatcher,
    objects: FileObjectStore,
}

impl SqliteBackend {
    pub fn new(db: Arc<Database>, dispatcher: ChangeDispatcher, objects: FileObjectStore) -> Arc<Self> {
        Arc::new(Self { db, dispatcher, objects })
    }

    pub fn dispatcher(&self) -> &ChangeDispatcher {
        &self.dispatcher
    }

    /// Run a blocking database closure off the async runtime.
    async fn blocking<T, F>(&self, op: &'static str, f: F) -> PortalResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| PortalError::transient(op, e))?
            .map_err(|e| PortalError::transient(op, e))
    }
}

impl Directory for SqliteBackend {
    fn request_by_user(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'_, PortalResult<Option<ApplicationRequest>>> {
        Box::pin(async move {
            let row = self
                .blocking("request_by_user", move |db| {
                    db.get_request_by_user(&user_id.to_string())
                })
                .await?;
            Ok(row.and_then(request_from_row))
        })
    }

    fn user_by_id(&self, user_id: Uuid) -> BoxFuture<'_, PortalResult<Option<PublicIdentity>>> {
        Box::pin(async move {
            let row = self
                .blocking("user_by_id", move |db| db.get_user_by_id(&user_id.to_string()))
                .await?;
            Ok(row.and_then(user_from_row))
        })
    }

    fn users_by_role(&self, role: Role) -> BoxFuture<'_, PortalResult<Vec<PublicIdentity>>> {
        Box::pin(async move {
            let rows = self
                .blocking("users_by_role", move |db| db.list_users_by_role(role_to_str(role)))
                .await?;
            Ok(rows.into_iter().filter_map(user_from_row).collect())
        })
    }

    fn requests_with_status(
        &self,
        statuses: &[ApplicationStatus],
    ) -> BoxFuture<'_, PortalResult<Vec<ApplicationRequest>>> {
        let statuses: Vec<&'static str> = statuses.iter().map(|s| status_to_str(*s)).collect();
        Box::pin(async move {
            let rows = self
                .blocking("requests_with_status", move |db| {
                    db.list_requests_with_status(&statuses)
                })
                .await?;
            Ok(rows.into_iter().filter_map(request_from_row).collect())
        })
    }
}

impl AuditLog for SqliteBackend {
    fn latest_access_reason(&self, user_id: Uuid) -> BoxFuture<'_, PortalResult<Option<String>>> {
        Box::pin(async move {
            self.blocking("latest_access_reason", move |db| {
                db.latest_access_reason(&user_id.to_string())
            })
            .await
        })
    }
}

impl MessageStore for SqliteBackend {
    fn list_messages(&self, key: ConversationKey) -> BoxFuture<'_, PortalResult<Vec<Message>>> {
        Box::pin(async move {
            let rows = self
                .blocking("list_messages", move |db| {
                    db.list_messages_between(&key.low().to_string(), &key.high().to_string())
                })
                .await?;
            Ok(rows.into_iter().filter_map(message_from_row).collect())
        })
    }

    fn insert_message(&self, msg: NewMessage) -> BoxFuture<'_, PortalResult<Message>> {
        Box::pin(async move {
            let stored = Message {
                id: Uuid::new_v4(),
                sender_id: msg.sender_id,
                receiver_id: msg.receiver_id,
                content: msg.content,
                attachment_url: msg.attachment_url,
                created_at: Utc::now(),
                delivery: DeliveryState::Confirmed,
            };

            let row = stored.clone();
            self.blocking("insert_message", move |db| {
                db.insert_message(
                    &row.id.to_string(),
                    &row.sender_id.to_string(),
                    &row.receiver_id.to_string(),
                    &row.content,
                    row.attachment_url.as_deref(),
                    &row.created_at.to_rfc3339(),
                )
            })
            .await?;

            // Announce only after the write has committed.
            self.dispatcher.publish(ChangeEvent::MessageInsert {
                id: stored.id,
                sender_id: stored.sender_id,
                receiver_id: stored.receiver_id,
            });

            Ok(stored)
        })
    }
}

impl ObjectStore for SqliteBackend {
    fn upload(&self, name: &str, bytes: Vec<u8>) -> BoxFuture<'_, PortalResult<String>> {
        self.objects.upload(name, bytes)
    }
}

impl PushChannel for SqliteBackend {
    fn subscribe(&self) -> PortalResult<broadcast::Receiver<ChangeEvent>> {
        Ok(self.dispatcher.subscribe())
    }
}
