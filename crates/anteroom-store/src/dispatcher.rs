use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use anteroom_types::events::ChangeEvent;

/// Fans out change events to every live subscriber.
///
/// The backend publishes after each committed write; subscribers hold a
/// broadcast receiver and unsubscribe by dropping it.
#[derive(Clone)]
pub struct ChangeDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeDispatcher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { tx }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.tx.subscribe()
    }

    /// Publish an event. A send with no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        if self.inner.tx.send(event).is_err() {
            debug!("change event dropped: no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }
}

impl Default for ChangeDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
