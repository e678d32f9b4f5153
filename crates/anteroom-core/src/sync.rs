//! Conversation synchronization.
//!
//! One engine instance owns the message history for a `(self, counterpart)`
//! pair and reconciles two concurrent sources: on-demand full fetches and
//! the push channel. Push payloads are treated purely as triggers — every
//! matching event causes a `refresh()`, trading an extra round-trip for
//! immunity to partial or duplicated push payloads.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use anteroom_types::events::ChangeEvent;
use anteroom_types::models::{ConversationKey, DeliveryState, Message, NewMessage, display_order};

use crate::error::{PortalError, PortalResult};
use crate::notify::{Notifier, Severity};
use crate::ports::{MessageStore, ObjectStore, PushChannel};

const UPLOAD_FAILED_KEY: &str = "attachment-upload-failed";
const SEND_FAILED_KEY: &str = "message-send-failed";

/// Binary content to upload alongside a message.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

pub struct MessageSyncEngine {
    store: Arc<dyn MessageStore>,
    objects: Arc<dyn ObjectStore>,
    push: Arc<dyn PushChannel>,
    notifier: Arc<Notifier>,
    self_id: Uuid,
    counterpart_id: Uuid,
    key: ConversationKey,
    inner: std::sync::Mutex<ConversationState>,
    view_tx: watch::Sender<Vec<Message>>,
    issued_seq: AtomicU64,
    fallback_refresh: Duration,
}

struct ConversationState {
    /// Durable rows as last fetched, in display order.
    confirmed: Vec<Message>,
    /// Optimistic entries not yet confirmed: `Pending` while a send is in
    /// flight, `Failed` after a send error until retried or dismissed.
    local: Vec<Message>,
    /// Apply-time guard: a fetch result older than the last applied one is
    /// discarded instead of overwriting fresher state.
    last_applied_seq: u64,
}

impl MessageSyncEngine {
    pub fn new(
        store: Arc<dyn MessageStore>,
        objects: Arc<dyn ObjectStore>,
        push: Arc<dyn PushChannel>,
        notifier: Arc<Notifier>,
        self_id: Uuid,
        counterpart_id: Uuid,
        fallback_refresh: Duration,
    ) -> Arc<Self> {
        let (view_tx, _) = watch::channel(Vec::new());
        Arc::new(Self {
            store,
            objects,
            push,
            notifier,
            self_id,
            counterpart_id,
            key: ConversationKey::new(self_id, counterpart_id),
            inner: std::sync::Mutex::new(ConversationState {
                confirmed: Vec::new(),
                local: Vec::new(),
                last_applied_seq: 0,
            }),
            view_tx,
            issued_seq: AtomicU64::new(0),
            fallback_refresh,
        })
    }

    pub fn conversation_key(&self) -> ConversationKey {
        self.key
    }

    /// Ordered merged view: confirmed history plus unconfirmed local
    /// entries, deduplicated by id, in display order.
    pub fn messages(&self) -> Vec<Message> {
        self.view_tx.borrow().clone()
    }

    pub fn watch_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.view_tx.subscribe()
    }

    /// Fetch the full ordered message set and replace the confirmed list.
    /// Idempotent; fetch errors are logged and the previous view retained.
    pub async fn refresh(&self) {
        let seq = self.issued_seq.fetch_add(1, Ordering::SeqCst) + 1;
        match self.store.list_messages(self.key).await {
            Ok(messages) => self.apply_confirmed(seq, messages),
            Err(e) => {
                warn!(user = %self.self_id, "message refresh failed: {}", e);
            }
        }
    }

    fn apply_confirmed(&self, seq: u64, mut messages: Vec<Message>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if seq <= inner.last_applied_seq {
            debug!(user = %self.self_id, seq, "stale refresh result dropped");
            return;
        }
        inner.last_applied_seq = seq;

        messages.sort_by(display_order);
        messages.dedup_by(|a, b| a.id == b.id);

        // A confirmed row supersedes any local entry that shares its id.
        let confirmed = messages;
        inner.local.retain(|m| !confirmed.iter().any(|c| c.id == m.id));
        inner.confirmed = confirmed;
        self.publish(&inner);
    }

    fn publish(&self, inner: &ConversationState) {
        let mut view = inner.confirmed.clone();
        for local in &inner.local {
            if !view.iter().any(|m| m.id == local.id) {
                view.push(local.clone());
            }
        }
        view.sort_by(display_order);
        self.view_tx.send_replace(view);
    }

    /// Send a message with optimistic local echo.
    ///
    /// The entry appears immediately as `Pending` under a provisional id.
    /// An attachment, if any, is uploaded first to obtain a durable handle.
    /// On success the optimistic entry is removed (the follow-up refresh
    /// supplies the durable copy); on failure it stays as `Failed` for
    /// user-initiated retry or dismissal.
    pub async fn send(
        &self,
        content: &str,
        attachment: Option<Attachment>,
    ) -> PortalResult<Message> {
        let provisional_id = Uuid::new_v4();
        let entry = Message {
            id: provisional_id,
            sender_id: self.self_id,
            receiver_id: self.counterpart_id,
            content: content.to_string(),
            attachment_url: None,
            created_at: Utc::now(),
            delivery: DeliveryState::Pending,
        };
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.local.push(entry);
            self.publish(&inner);
        }

        let attachment_url = match attachment {
            Some(att) => match self.objects.upload(&att.name, att.bytes).await {
                Ok(url) => {
                    self.set_attachment_url(provisional_id, &url);
                    Some(url)
                }
                Err(e) => {
                    warn!(user = %self.self_id, "attachment upload failed: {}", e);
                    self.mark_failed(provisional_id);
                    self.notifier.notify(
                        "Attachment upload failed",
                        Severity::Error,
                        Some(UPLOAD_FAILED_KEY),
                    );
                    return Err(PortalError::Upload(anyhow::Error::new(e)));
                }
            },
            None => None,
        };

        self.persist(provisional_id, NewMessage {
            sender_id: self.self_id,
            receiver_id: self.counterpart_id,
            content: content.to_string(),
            attachment_url,
        })
        .await
    }

    /// Re-attempt persisting a failed entry as-is. An attachment that was
    /// already uploaded keeps its durable handle; one whose upload failed
    /// is retried as a text-only message.
    pub async fn retry(&self, id: Uuid) -> PortalResult<Message> {
        let entry = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = inner
                .local
                .iter_mut()
                .find(|m| m.id == id && m.delivery == DeliveryState::Failed)
            else {
                return Err(PortalError::NotFound);
            };
            entry.delivery = DeliveryState::Pending;
            let entry = entry.clone();
            self.publish(&inner);
            entry
        };

        self.persist(id, NewMessage {
            sender_id: entry.sender_id,
            receiver_id: entry.receiver_id,
            content: entry.content,
            attachment_url: entry.attachment_url,
        })
        .await
    }

    /// Discard a failed entry. Returns whether one was removed.
    pub fn dismiss(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = inner.local.len();
        inner
            .local
            .retain(|m| !(m.id == id && m.delivery == DeliveryState::Failed));
        let removed = inner.local.len() < before;
        if removed {
            self.publish(&inner);
        }
        removed
    }

    async fn persist(&self, provisional_id: Uuid, msg: NewMessage) -> PortalResult<Message> {
        match self.store.insert_message(msg).await {
            Ok(durable) => {
                {
                    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                    inner.local.retain(|m| m.id != provisional_id);
                    self.publish(&inner);
                }
                // The push event will also trigger this; doing it here keeps
                // pull-only mode prompt. Idempotent either way.
                self.refresh().await;
                Ok(durable)
            }
            Err(e) => {
                warn!(user = %self.self_id, "message send failed: {}", e);
                self.mark_failed(provisional_id);
                self.notifier.notify(
                    "Message failed to send",
                    Severity::Error,
                    Some(SEND_FAILED_KEY),
                );
                Err(PortalError::Send(anyhow::Error::new(e)))
            }
        }
    }

    fn set_attachment_url(&self, id: Uuid, url: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = inner.local.iter_mut().find(|m| m.id == id) {
            entry.attachment_url = Some(url.to_string());
        }
    }

    fn mark_failed(&self, id: Uuid) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = inner.local.iter_mut().find(|m| m.id == id) {
            entry.delivery = DeliveryState::Failed;
        }
        self.publish(&inner);
    }

    /// Activate the engine: initial refresh, then live updates.
    ///
    /// Subscribes to the push channel and refreshes on every event scoped
    /// to this conversation. A lagged receiver triggers a refresh as well,
    /// since a full fetch is corrective by construction. If the
    /// subscription cannot be established (or the channel closes) the
    /// engine degrades to periodic pull-only refreshes.
    ///
    /// The returned handle aborts the listener on drop, releasing the
    /// subscription on every exit path.
    pub fn activate(self: &Arc<Self>) -> EngineHandle {
        let engine = self.clone();
        let join = tokio::spawn(async move {
            engine.refresh().await;

            let rx = match engine.push.subscribe() {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(user = %engine.self_id, "push subscription failed, pull-only mode: {}", e);
                    engine.pull_only_loop().await;
                    return;
                }
            };

            engine.listen(rx).await;
        });
        EngineHandle { join }
    }

    async fn listen(&self, mut rx: broadcast::Receiver<ChangeEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.conversation_key() == self.key {
                        self.refresh().await;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(user = %self.self_id, "push receiver lagged by {}, refreshing", n);
                    self.refresh().await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    warn!(user = %self.self_id, "push channel closed, pull-only mode");
                    self.pull_only_loop().await;
                    return;
                }
            }
        }
    }

    async fn pull_only_loop(&self) {
        let mut interval = tokio::time::interval(self.fallback_refresh);
        loop {
            interval.tick().await;
            self.refresh().await;
        }
    }
}

/// Abort-on-drop guard for the push listener. Dropping it tears down the
/// subscription and any fallback refresh loop.
pub struct EngineHandle {
    join: JoinHandle<()>,
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}
