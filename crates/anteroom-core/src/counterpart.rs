//! Counterpart resolution.
//!
//! A member always talks to the administrator; the administrator talks to a
//! single representative applicant. Absence of a match means "no
//! conversation available", never an error.

use std::sync::Arc;

use tracing::{debug, warn};

use anteroom_types::models::{ApplicationStatus, PublicIdentity, Role};

use crate::ports::Directory;

/// The resolved messaging peer for a session.
#[derive(Debug, Clone)]
pub struct Counterpart {
    pub identity: PublicIdentity,
}

pub struct CounterpartyResolver {
    directory: Arc<dyn Directory>,
}

impl CounterpartyResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Resolve the counterpart for `current`. The result is intended to be
    /// cached by the session; re-resolution is an explicit caller decision.
    /// Directory errors are logged and yield `None`.
    pub async fn resolve(&self, current: &PublicIdentity) -> Option<Counterpart> {
        match current.role {
            Role::Admin => self.resolve_for_admin(current).await,
            Role::Member => self.resolve_admin().await,
        }
    }

    /// Admin side: pick the user behind the most-recently-created request
    /// that is pending or approved.
    ///
    /// This is a heuristic: with several users mid-review at once there is
    /// no guarantee the picked one is the intended conversation. The
    /// tie-break (newest request, then larger user id) only makes the pick
    /// deterministic, not smarter.
    async fn resolve_for_admin(&self, current: &PublicIdentity) -> Option<Counterpart> {
        let requests = self
            .directory
            .requests_with_status(&[ApplicationStatus::Pending, ApplicationStatus::Approved])
            .await
            .map_err(|e| warn!(user = %current.id, "counterpart request listing failed: {}", e))
            .ok()?;

        let chosen = requests
            .into_iter()
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.user_id.cmp(&b.user_id))
            })?;

        let identity = self
            .directory
            .user_by_id(chosen.user_id)
            .await
            .map_err(|e| warn!(user = %current.id, "counterpart identity lookup failed: {}", e))
            .ok()??;

        debug!(admin = %current.id, counterpart = %identity.id, "resolved applicant counterpart");
        Some(Counterpart { identity })
    }

    /// Member side: first administrator the directory knows about.
    async fn resolve_admin(&self) -> Option<Counterpart> {
        let admins = self
            .directory
            .users_by_role(Role::Admin)
            .await
            .map_err(|e| warn!("admin lookup failed: {}", e))
            .ok()?;

        let identity = admins.into_iter().next()?;
        debug!(counterpart = %identity.id, "resolved admin counterpart");
        Some(Counterpart { identity })
    }
}
