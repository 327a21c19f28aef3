//! Change notifications published by the index manager.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexEvent {
    TrackAdded {
        retrieval_id: String,
        track_id: String,
    },
    TrackUpdated {
        retrieval_id: String,
        track_id: String,
    },
    TrackRemoved {
        retrieval_id: String,
        track_id: String,
    },
    AvailabilityChanged {
        retrieval_id: String,
        track_id: String,
        is_available: bool,
    },
    IntegrityVerified {
        valid: usize,
        corrupt: usize,
        missing: usize,
        orphaned: usize,
        fixes: usize,
    },
    CleanupCompleted {
        dry_run: bool,
        files_removed: usize,
        bytes_freed: u64,
    },
    IndexImported {
        entries: usize,
    },
}

/// Broadcasts [`IndexEvent`]s. Publishing never blocks and never fails;
/// events sent with no subscribers are dropped.
pub struct IndexNotifier {
    sender: broadcast::Sender<IndexEvent>,
}

impl IndexNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: IndexEvent) {
        if self.sender.send(event).is_err() {
            debug!("No subscribers for index event");
        }
    }
}

impl Default for IndexNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let notifier = IndexNotifier::new();
        let mut rx = notifier.subscribe();

        notifier.publish(IndexEvent::IndexImported { entries: 3 });

        assert_eq!(rx.recv().await.unwrap(), IndexEvent::IndexImported { entries: 3 });
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let notifier = IndexNotifier::new();
        notifier.publish(IndexEvent::IndexImported { entries: 0 });
    }
}
