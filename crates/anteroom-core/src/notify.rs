//! Deduplicated user-visible notifications.
//!
//! Both the status tracker and the sync engine report events through one
//! process-scoped [`Notifier`]. Repeated alerts for the same key inside the
//! cooldown window collapse into a single delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// Delivery target for alerts. The portal binary uses [`TracingAlertSink`];
/// an embedding UI supplies its own.
pub trait AlertSink: Send + Sync {
    fn alert(&self, severity: Severity, message: &str);
}

/// Logs alerts through tracing at a level matching severity.
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Error => error!("alert: {}", message),
            Severity::Success | Severity::Info => info!("alert: {}", message),
        }
    }
}

/// Suppresses repeated identical alerts within a cooldown window.
///
/// Issuing a notification records a ticket keyed by the dedup key (or the
/// message text when no key is given) that expires after the cooldown.
/// Tickets are evicted lazily whenever the map is consulted; a ticket that
/// outlives its window without being touched only ever suppresses its own
/// key, so no per-ticket timer is needed.
pub struct Notifier {
    sink: Arc<dyn AlertSink>,
    cooldown: Duration,
    tickets: Mutex<HashMap<String, Instant>>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn AlertSink>, cooldown: Duration) -> Self {
        Self {
            sink,
            cooldown,
            tickets: Mutex::new(HashMap::new()),
        }
    }

    /// Fire an alert unless a live ticket exists for its key.
    /// Returns whether the alert was actually delivered.
    pub fn notify(&self, message: &str, severity: Severity, key: Option<&str>) -> bool {
        let key = key.unwrap_or(message);
        let now = Instant::now();

        let mut tickets = self.tickets.lock().unwrap_or_else(|e| e.into_inner());
        tickets.retain(|_, expires_at| *expires_at > now);

        if tickets.contains_key(key) {
            return false;
        }
        tickets.insert(key.to_string(), now + self.cooldown);
        drop(tickets);

        self.sink.alert(severity, message);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        delivered: AtomicUsize,
    }

    impl AlertSink for CountingSink {
        fn alert(&self, _severity: Severity, _message: &str) {
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn notifier(cooldown: Duration) -> (Notifier, Arc<CountingSink>) {
        let sink = Arc::new(CountingSink { delivered: AtomicUsize::new(0) });
        (Notifier::new(sink.clone(), cooldown), sink)
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_within_cooldown_is_suppressed() {
        let (notifier, sink) = notifier(Duration::from_secs(5));

        assert!(notifier.notify("X", Severity::Error, Some("k")));
        assert!(!notifier.notify("X", Severity::Error, Some("k")));
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(notifier.notify("X", Severity::Error, Some("k")));
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn message_text_is_the_default_key() {
        let (notifier, sink) = notifier(Duration::from_secs(5));

        assert!(notifier.notify("saved", Severity::Info, None));
        assert!(!notifier.notify("saved", Severity::Info, None));
        assert!(notifier.notify("deleted", Severity::Info, None));
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_do_not_interfere() {
        let (notifier, sink) = notifier(Duration::from_secs(5));

        assert!(notifier.notify("same text", Severity::Info, Some("a")));
        assert!(notifier.notify("same text", Severity::Info, Some("b")));
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 2);
    }
}
