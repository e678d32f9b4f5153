//! In-memory backend shared by the core integration tests.
//!
//! Implements every collaborator port over mutex-guarded vectors plus a
//! broadcast channel for push events. Failure toggles and per-call fetch
//! delays let tests exercise degraded and racy paths deterministically
//! under a paused tokio clock.

// Each test binary uses a different slice of these helpers.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use uuid::Uuid;

use anteroom_core::error::{PortalError, PortalResult};
use anteroom_core::notify::{AlertSink, Notifier, Severity};
use anteroom_core::ports::{AuditLog, Directory, MessageStore, ObjectStore, PushChannel};
use anteroom_types::events::ChangeEvent;
use anteroom_types::models::{
    ApplicationRequest, ApplicationStatus, ConversationKey, DeliveryState, Message, NewMessage,
    PublicIdentity, Role,
};

pub fn uid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub fn identity(n: u128, username: &str, role: Role) -> PublicIdentity {
    PublicIdentity {
        id: uid(n),
        username: username.to_string(),
        role,
        created_at: ts(0),
    }
}

pub fn request(user: u128, status: ApplicationStatus, created_secs: i64) -> ApplicationRequest {
    ApplicationRequest {
        user_id: uid(user),
        status,
        rejection_reason: None,
        created_at: ts(created_secs),
    }
}

pub fn stored_message(id: u128, from: u128, to: u128, content: &str, secs: i64) -> Message {
    Message {
        id: uid(id),
        sender_id: uid(from),
        receiver_id: uid(to),
        content: content.to_string(),
        attachment_url: None,
        created_at: ts(secs),
        delivery: DeliveryState::Confirmed,
    }
}

/// Alert sink capturing every delivered alert.
#[derive(Default)]
pub struct RecordingSink {
    pub alerts: Mutex<Vec<(Severity, String)>>,
}

impl RecordingSink {
    pub fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

impl AlertSink for RecordingSink {
    fn alert(&self, severity: Severity, message: &str) {
        self.alerts.lock().unwrap().push((severity, message.to_string()));
    }
}

pub fn recording_notifier(cooldown: Duration) -> (Arc<Notifier>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    (Arc::new(Notifier::new(sink.clone(), cooldown)), sink)
}

pub struct FakeBackend {
    pub users: Mutex<Vec<PublicIdentity>>,
    pub requests: Mutex<Vec<ApplicationRequest>>,
    /// `(user, reason)` pairs, oldest first.
    pub audit: Mutex<Vec<(Uuid, String)>>,
    pub messages: Mutex<Vec<Message>>,
    pub events_tx: broadcast::Sender<ChangeEvent>,

    pub fail_directory: AtomicBool,
    pub fail_audit: AtomicBool,
    pub fail_list: AtomicBool,
    pub fail_insert: AtomicBool,
    pub fail_upload: AtomicBool,
    pub fail_subscribe: AtomicBool,

    /// Sleep applied to the next fetches, one entry per call. The snapshot
    /// is taken before sleeping, so a delayed call returns stale data.
    pub list_delays: Mutex<VecDeque<Duration>>,
    pub request_delays: Mutex<VecDeque<Duration>>,

    pub request_fetches: AtomicUsize,
    pub list_fetches: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            users: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            audit: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            events_tx,
            fail_directory: AtomicBool::new(false),
            fail_audit: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
            fail_insert: AtomicBool::new(false),
            fail_upload: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            list_delays: Mutex::new(VecDeque::new()),
            request_delays: Mutex::new(VecDeque::new()),
            request_fetches: AtomicUsize::new(0),
            list_fetches: AtomicUsize::new(0),
            next_id: AtomicUsize::new(0x1000),
        })
    }

    pub fn set_request(&self, req: ApplicationRequest) {
        let mut requests = self.requests.lock().unwrap();
        requests.retain(|r| r.user_id != req.user_id);
        requests.push(req);
    }

    pub fn add_audit(&self, user: Uuid, reason: &str) {
        self.audit.lock().unwrap().push((user, reason.to_string()));
    }

    /// Store a message directly and announce it, as a remote writer would.
    pub fn remote_insert(&self, msg: Message) {
        let event = ChangeEvent::MessageInsert {
            id: msg.id,
            sender_id: msg.sender_id,
            receiver_id: msg.receiver_id,
        };
        self.messages.lock().unwrap().push(msg);
        let _ = self.events_tx.send(event);
    }
}

fn transient(op: &'static str) -> PortalError {
    PortalError::transient(op, anyhow!("injected backend failure"))
}

impl Directory for FakeBackend {
    fn request_by_user(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'_, PortalResult<Option<ApplicationRequest>>> {
        Box::pin(async move {
            self.request_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_directory.load(Ordering::SeqCst) {
                return Err(transient("request_by_user"));
            }
            let snapshot = self
                .requests
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.user_id == user_id)
                .cloned();
            let delay = self.request_delays.lock().unwrap().pop_front();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(snapshot)
        })
    }

    fn user_by_id(&self, user_id: Uuid) -> BoxFuture<'_, PortalResult<Option<PublicIdentity>>> {
        Box::pin(async move {
            if self.fail_directory.load(Ordering::SeqCst) {
                return Err(transient("user_by_id"));
            }
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.id == user_id)
                .cloned())
        })
    }

    fn users_by_role(&self, role: Role) -> BoxFuture<'_, PortalResult<Vec<PublicIdentity>>> {
        Box::pin(async move {
            if self.fail_directory.load(Ordering::SeqCst) {
                return Err(transient("users_by_role"));
            }
            Ok(self
                .users
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.role == role)
                .cloned()
                .collect())
        })
    }

    fn requests_with_status(
        &self,
        statuses: &[ApplicationStatus],
    ) -> BoxFuture<'_, PortalResult<Vec<ApplicationRequest>>> {
        let statuses = statuses.to_vec();
        Box::pin(async move {
            if self.fail_directory.load(Ordering::SeqCst) {
                return Err(transient("requests_with_status"));
            }
            Ok(self
                .requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| statuses.contains(&r.status))
                .cloned()
                .collect())
        })
    }
}

impl AuditLog for FakeBackend {
    fn latest_access_reason(&self, user_id: Uuid) -> BoxFuture<'_, PortalResult<Option<String>>> {
        Box::pin(async move {
            if self.fail_audit.load(Ordering::SeqCst) {
                return Err(transient("latest_access_reason"));
            }
            Ok(self
                .audit
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(u, _)| *u == user_id)
                .map(|(_, reason)| reason.clone()))
        })
    }
}

impl MessageStore for FakeBackend {
    fn list_messages(&self, key: ConversationKey) -> BoxFuture<'_, PortalResult<Vec<Message>>> {
        Box::pin(async move {
            self.list_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(transient("list_messages"));
            }
            let snapshot: Vec<Message> = self
                .messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.conversation_key() == key)
                .cloned()
                .collect();
            let delay = self.list_delays.lock().unwrap().pop_front();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(snapshot)
        })
    }

    fn insert_message(&self, msg: NewMessage) -> BoxFuture<'_, PortalResult<Message>> {
        Box::pin(async move {
            if self.fail_insert.load(Ordering::SeqCst) {
                return Err(PortalError::transient(
                    "insert_message",
                    anyhow!("injected insert failure"),
                ));
            }
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            let stored = Message {
                id: uid(n as u128),
                sender_id: msg.sender_id,
                receiver_id: msg.receiver_id,
                content: msg.content,
                attachment_url: msg.attachment_url,
                created_at: ts(n as i64),
                delivery: DeliveryState::Confirmed,
            };
            self.messages.lock().unwrap().push(stored.clone());
            let _ = self.events_tx.send(ChangeEvent::MessageInsert {
                id: stored.id,
                sender_id: stored.sender_id,
                receiver_id: stored.receiver_id,
            });
            Ok(stored)
        })
    }
}

impl ObjectStore for FakeBackend {
    fn upload(&self, name: &str, _bytes: Vec<u8>) -> BoxFuture<'_, PortalResult<String>> {
        let name = name.to_string();
        Box::pin(async move {
            if self.fail_upload.load(Ordering::SeqCst) {
                return Err(PortalError::Upload(anyhow!("injected upload failure")));
            }
            Ok(format!("fake://objects/{}", name))
        })
    }
}

impl PushChannel for FakeBackend {
    fn subscribe(&self) -> PortalResult<broadcast::Receiver<ChangeEvent>> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(PortalError::Subscription(anyhow!(
                "injected subscribe failure"
            )));
        }
        Ok(self.events_tx.subscribe())
    }
}
