use std::sync::Arc;

use gateway_common::GatewayError;
use gateway_protocol::{SessionId, SseEvent};
use gateway_storage::{Notification, Storage};
use tokio::sync::broadcast;
use uuid::Uuid;

fn session_key(session: SessionId) -> String {
    format!("session:{session}")
}

/// Per-session pub/sub + replay log (§4.8). Every emitted SSE frame is
/// written to the session's hash (persistence) and, when the write asks for
/// it, broadcast to live subscribers (fan-out) in the same call.
pub struct SessionBus {
    storage: Arc<dyn Storage>,
}

impl SessionBus {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn publish_frame(&self, session: SessionId, frame: &SseEvent, ttl_ms: u64) -> Result<(), GatewayError> {
        self.storage
            .hash_set(
                &session_key(session),
                &frame.id.to_string(),
                frame.to_stored_json(),
                ttl_ms,
                true,
            )
            .await
            .map_err(|e| GatewayError::StorageSetError(e.to_string()))
    }

    /// All frames recorded for `session`, in emission order. Empty if the
    /// session never existed or its TTL has elapsed.
    pub async fn replay(&self, session: SessionId) -> Result<Vec<SseEvent>, GatewayError> {
        let fields = self
            .storage
            .hash_get_all(&session_key(session))
            .await
            .map_err(|e| GatewayError::StorageGetError(e.to_string()))?;
        let mut events: Vec<SseEvent> = fields
            .iter()
            .filter_map(|(_, value)| SseEvent::from_stored_json(value))
            .collect();
        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    /// `replay` filtered to frames whose id sorts after `after`, per the
    /// `resumeEventId` contract in §4.8. `None` returns everything.
    pub async fn replay_after(&self, session: SessionId, after: Option<Uuid>) -> Result<Vec<SseEvent>, GatewayError> {
        let events = self.replay(session).await?;
        Ok(match after {
            None => events,
            Some(after) => events.into_iter().filter(|e| e.id > after).collect(),
        })
    }

    pub async fn subscribe(&self, session: SessionId) -> Result<broadcast::Receiver<Notification>, GatewayError> {
        self.storage
            .subscribe(&session_key(session))
            .await
            .map_err(|e| GatewayError::StorageGetError(e.to_string()))
    }

    pub async fn unsubscribe(&self, session: SessionId) {
        self.storage.unsubscribe(&session_key(session)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_storage::MemoryStorage;

    #[tokio::test]
    async fn replay_after_returns_only_the_suffix() {
        let bus = SessionBus::new(Arc::new(MemoryStorage::new()));
        let session = SessionId::new();
        let ids: Vec<Uuid> = (0..3).map(|_| crate::ids::new_event_id()).collect();
        for id in &ids {
            bus.publish_frame(session, &SseEvent::content(*id, "hi"), 60_000)
                .await
                .unwrap();
        }
        let suffix = bus.replay_after(session, Some(ids[0])).await.unwrap();
        assert_eq!(suffix.len(), 2);
        assert_eq!(suffix[0].id, ids[1]);
        assert_eq!(suffix[1].id, ids[2]);
    }

    #[tokio::test]
    async fn subscriber_observes_published_frame() {
        let bus = SessionBus::new(Arc::new(MemoryStorage::new()));
        let session = SessionId::new();
        let mut rx = bus.subscribe(session).await.unwrap();
        let id = crate::ids::new_event_id();
        bus.publish_frame(session, &SseEvent::content(id, "live"), 60_000)
            .await
            .unwrap();
        let note = rx.recv().await.unwrap();
        assert_eq!(note.channel, format!("session:{session}"));
    }

    #[tokio::test]
    async fn unknown_session_replays_empty() {
        let bus = SessionBus::new(Arc::new(MemoryStorage::new()));
        assert!(bus.replay(SessionId::new()).await.unwrap().is_empty());
    }
}
