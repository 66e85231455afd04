//! Notification sink
//!
//! Services collect `Notice`s while their transaction runs and hand them to a
//! `NotificationSink` only after the commit. Delivery is best effort: a failing
//! sink is logged and never reaches the caller of the core operation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::gateway::Store;
use crate::models::{Notification, NotificationKind, Record, RelatedType};

/// A state change worth telling a user about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub recipient_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
    pub related_id: Option<Uuid>,
    pub related_type: Option<RelatedType>,
    pub metadata: Map<String, Value>,
}

impl Notice {
    pub fn new(kind: NotificationKind, recipient_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            recipient_id,
            actor_id: None,
            kind,
            title: title.into(),
            description: String::new(),
            related_id: None,
            related_type: None,
            metadata: Map::new(),
        }
    }

    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn related(mut self, id: Uuid, related_type: RelatedType) -> Self {
        self.related_id = Some(id);
        self.related_type = Some(related_type);
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn into_notification(self) -> Notification {
        Notification {
            record: Record::new(),
            user_id: self.recipient_id,
            actor_id: self.actor_id,
            kind: self.kind,
            title: self.title,
            description: self.description,
            related_id: self.related_id,
            related_type: self.related_type,
            metadata: Value::Object(self.metadata),
            is_read: false,
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn send(&self, notice: &Notice) -> anyhow::Result<()>;
}

/// Hands every notice to the sink, logging and dropping failures
pub fn deliver(sink: &dyn NotificationSink, notices: &[Notice]) {
    for notice in notices {
        if let Err(e) = sink.send(notice) {
            warn!(
                "Failed to deliver {} notification to {}: {}",
                notice.kind, notice.recipient_id, e
            );
        }
    }
}

// ============================================================================
// SINKS
// ============================================================================

/// Persists notices as notification rows, each in its own transaction
pub struct StoreSink<S> {
    store: Arc<S>,
}

impl<S: Store> StoreSink<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: Store> NotificationSink for StoreSink<S> {
    fn send(&self, notice: &Notice) -> anyhow::Result<()> {
        let notification = notice.clone().into_notification();
        self.store
            .transaction(|gw| gw.insert_notification(&notification))?;
        debug!(
            "Stored {} notification {} for {}",
            notification.kind, notification.record.id, notification.user_id
        );
        Ok(())
    }
}

/// Writes notices to the log only
pub struct LogSink;

impl NotificationSink for LogSink {
    fn send(&self, notice: &Notice) -> anyhow::Result<()> {
        info!(
            kind = %notice.kind,
            recipient = %notice.recipient_id,
            "{}",
            notice.title
        );
        Ok(())
    }
}

/// Enqueues notices on a bounded channel drained by [`run_delivery`]
#[derive(Clone)]
pub struct QueuedSink {
    tx: mpsc::Sender<Notice>,
}

impl QueuedSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notice>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl NotificationSink for QueuedSink {
    fn send(&self, notice: &Notice) -> anyhow::Result<()> {
        self.tx
            .try_send(notice.clone())
            .map_err(|e| anyhow::anyhow!("notification queue rejected notice: {}", e))
    }
}

/// Drains the queue into `sink` until every sender is dropped
pub async fn run_delivery(mut rx: mpsc::Receiver<Notice>, sink: Arc<dyn NotificationSink>) {
    info!("Notification delivery started");
    while let Some(notice) = rx.recv().await {
        let sink = sink.clone();
        let kind = notice.kind;
        let recipient = notice.recipient_id;
        match tokio::task::spawn_blocking(move || sink.send(&notice)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to deliver {} notification to {}: {}", kind, recipient, e),
            Err(e) => warn!("Notification delivery task failed: {}", e),
        }
    }
    info!("Notification delivery stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::testing::{FailingSink, RecordingSink};

    fn liked(recipient: Uuid) -> Notice {
        Notice::new(NotificationKind::BountyLiked, recipient, "Someone liked your bounty")
            .actor(Uuid::new_v4())
            .related(Uuid::new_v4(), RelatedType::Bounty)
            .meta("likes", 3)
    }

    #[test]
    fn test_notice_into_notification() {
        let recipient = Uuid::new_v4();
        let notification = liked(recipient).into_notification();
        assert_eq!(notification.user_id, recipient);
        assert_eq!(notification.related_type, Some(RelatedType::Bounty));
        assert_eq!(notification.metadata["likes"], 3);
        assert!(!notification.is_read);
    }

    #[test]
    fn test_store_sink_writes_rows() {
        let store = Arc::new(MemoryStore::new());
        let sink = StoreSink::new(store.clone());
        let recipient = Uuid::new_v4();

        deliver(&sink, &[liked(recipient), liked(recipient)]);

        let stored = store
            .transaction(|gw| gw.notifications_for_user(recipient))
            .unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn test_deliver_swallows_failures() {
        // Must not panic or propagate
        deliver(&FailingSink, &[liked(Uuid::new_v4())]);
    }

    #[test]
    fn test_full_queue_reports_error() {
        let (sink, _rx) = QueuedSink::new(1);
        assert!(sink.send(&liked(Uuid::new_v4())).is_ok());
        assert!(sink.send(&liked(Uuid::new_v4())).is_err());
    }

    #[test]
    fn test_queue_feeds_store_sink() {
        let store = Arc::new(MemoryStore::new());
        let (sink, rx) = QueuedSink::new(4);
        let recipient = Uuid::new_v4();

        deliver(&sink, &[liked(recipient)]);
        drop(sink);
        tokio_test::block_on(run_delivery(rx, Arc::new(StoreSink::new(store.clone()))));

        let stored = store
            .transaction(|gw| gw.notifications_for_user(recipient))
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, NotificationKind::BountyLiked);
    }

    #[tokio::test]
    async fn test_queued_sink_drains_into_inner_sink() {
        let recorder = Arc::new(RecordingSink::default());
        let (sink, rx) = QueuedSink::new(8);
        let recipient = Uuid::new_v4();

        sink.send(&liked(recipient)).unwrap();
        sink.send(&liked(recipient)).unwrap();
        drop(sink);

        run_delivery(rx, recorder.clone()).await;
        assert_eq!(recorder.sent_to(recipient).len(), 2);
    }
}
