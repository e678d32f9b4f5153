//! Application-status reconciliation.
//!
//! Periodically re-reads the user's application request from the directory
//! and walks a small state machine. Approval and rejection each fire a
//! one-shot deduplicated notification; rejection additionally resolves the
//! stored reason and raises a leave-gated-area signal for the surrounding
//! UI. The tracker only observes requests, it never mutates them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use anteroom_types::models::ApplicationStatus;

use crate::notify::{Notifier, Severity};
use crate::ports::{AuditLog, Directory};

const APPROVED_KEY: &str = "application-approved";
const REJECTED_KEY: &str = "application-rejected";

/// Externally observable tracker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateState {
    Loading,
    NoRequest,
    Pending,
    Approved,
    Rejected { reason: Option<String> },
}

impl GateState {
    /// Terminal states require no further reconciliation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected { .. })
    }
}

pub struct StatusTracker {
    directory: Arc<dyn Directory>,
    audit: Arc<dyn AuditLog>,
    notifier: Arc<Notifier>,
    user_id: Uuid,
    state_tx: watch::Sender<GateState>,
    leave_tx: watch::Sender<bool>,
    /// Held across a reconcile; concurrent calls are dropped, not queued.
    inflight: tokio::sync::Mutex<()>,
    /// Monotonic request sequence, compared at apply-time so a slow fetch
    /// can never overwrite the result of a fresher one.
    issued_seq: AtomicU64,
    apply: std::sync::Mutex<ApplyState>,
}

struct ApplyState {
    last_applied_seq: u64,
}

impl StatusTracker {
    pub fn new(
        directory: Arc<dyn Directory>,
        audit: Arc<dyn AuditLog>,
        notifier: Arc<Notifier>,
        user_id: Uuid,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(GateState::Loading);
        let (leave_tx, _) = watch::channel(false);
        Arc::new(Self {
            directory,
            audit,
            notifier,
            user_id,
            state_tx,
            leave_tx,
            inflight: tokio::sync::Mutex::new(()),
            issued_seq: AtomicU64::new(0),
            apply: std::sync::Mutex::new(ApplyState { last_applied_seq: 0 }),
        })
    }

    pub fn state(&self) -> GateState {
        self.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<GateState> {
        self.state_tx.subscribe()
    }

    /// Becomes true exactly once, when a rejection asks the surrounding UI
    /// to navigate away from the gated area.
    pub fn watch_leave(&self) -> watch::Receiver<bool> {
        self.leave_tx.subscribe()
    }

    /// Reconcile local state against the directory.
    ///
    /// Idempotent. If a reconcile is already in flight the call is dropped.
    /// Backend errors are logged and swallowed; the previous state is
    /// retained and the next scheduled tick retries.
    pub async fn reconcile(&self) {
        let Ok(_guard) = self.inflight.try_lock() else {
            debug!(user = %self.user_id, "reconcile already in flight, dropping");
            return;
        };
        let seq = self.issued_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let observed = match self.directory.request_by_user(self.user_id).await {
            Ok(req) => req,
            Err(e) => {
                warn!(user = %self.user_id, "status reconcile failed: {}", e);
                return;
            }
        };

        let next = match &observed {
            None => GateState::NoRequest,
            Some(req) => match req.status {
                ApplicationStatus::None => GateState::NoRequest,
                ApplicationStatus::Pending => GateState::Pending,
                ApplicationStatus::Approved => GateState::Approved,
                ApplicationStatus::Rejected => {
                    let reason = match req.rejection_reason.clone() {
                        Some(r) => Some(r),
                        None => self.fetch_rejection_reason().await,
                    };
                    GateState::Rejected { reason }
                }
            },
        };

        self.apply(seq, next);
    }

    /// The stored reason for the most recent access decision. Errors are
    /// logged; the rejection is then reported without a reason.
    async fn fetch_rejection_reason(&self) -> Option<String> {
        match self.audit.latest_access_reason(self.user_id).await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(user = %self.user_id, "rejection reason lookup failed: {}", e);
                None
            }
        }
    }

    /// Apply a reconcile result, enforcing the transition edges and
    /// discarding stale results.
    fn apply(&self, seq: u64, next: GateState) {
        let mut apply = self.apply.lock().unwrap_or_else(|e| e.into_inner());
        if seq <= apply.last_applied_seq {
            debug!(user = %self.user_id, seq, "stale reconcile result dropped");
            return;
        }
        apply.last_applied_seq = seq;

        let prev = self.state();
        if prev.is_terminal() {
            // Redundant poll after a terminal state; nothing left to do.
            return;
        }

        match (&prev, &next) {
            // A pending request vanishing is not a defined transition;
            // retain the last known state until the directory says more.
            (GateState::Pending, GateState::NoRequest) => return,
            (GateState::Pending, GateState::Approved) => {
                self.notifier.notify(
                    "Your application has been approved",
                    Severity::Success,
                    Some(APPROVED_KEY),
                );
            }
            (_, GateState::Rejected { .. }) => {
                self.notifier.notify(
                    "Your application was rejected",
                    Severity::Error,
                    Some(REJECTED_KEY),
                );
                self.leave_tx.send_replace(true);
            }
            _ => {}
        }

        if prev != next {
            debug!(user = %self.user_id, ?prev, ?next, "application status transition");
        }
        self.state_tx.send_replace(next);
    }

    /// Start the poll loop: one immediate reconcile, then one per interval
    /// until a terminal state is reached. The returned handle aborts the
    /// loop on drop, so deactivation cancels all pending polls.
    pub fn spawn(self: &Arc<Self>, poll_interval: Duration) -> TrackerHandle {
        let tracker = self.clone();
        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                interval.tick().await;
                tracker.reconcile().await;
                if tracker.state().is_terminal() {
                    break;
                }
            }
            debug!(user = %tracker.user_id, "status poll loop finished");
        });
        TrackerHandle { join }
    }
}

/// Abort-on-drop guard for the poll loop.
pub struct TrackerHandle {
    join: JoinHandle<()>,
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}
