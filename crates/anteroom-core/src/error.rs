use thiserror::Error;

pub type PortalResult<T> = Result<T, PortalError>;

/// Failure taxonomy for the portal core.
///
/// `TransientFetch` is retried by the next scheduled tick and never shown to
/// the user. `NotFound` is an expected absence, handled as a valid state by
/// the caller. `Upload`/`Send` surface through a deduplicated notification
/// and mark the originating optimistic entry failed. `Subscription` degrades
/// the sync engine to pull-only refreshes.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("transient backend failure during {op}: {source}")]
    TransientFetch {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("record not found")]
    NotFound,

    #[error("attachment upload failed: {0}")]
    Upload(#[source] anyhow::Error),

    #[error("message send failed: {0}")]
    Send(#[source] anyhow::Error),

    #[error("push subscription failed: {0}")]
    Subscription(#[source] anyhow::Error),
}

impl PortalError {
    pub fn transient(op: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::TransientFetch { op, source: source.into() }
    }
}
