use std::sync::Arc;

use gateway_common::GatewayError;
use gateway_protocol::{ChatTurn, SessionId};
use gateway_storage::Storage;
use uuid::Uuid;

fn history_key(session: SessionId) -> String {
    format!("history:{session}")
}

/// Append-only per-session turn log (§4.7): a hash of `eventId -> ChatTurn`
/// under the session-wide TTL, keyed `history:<sessionId>`.
pub struct HistoryStore {
    storage: Arc<dyn Storage>,
}

impl HistoryStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Appends one turn, refreshing the whole-key TTL (§4.4's `hashSet`
    /// contract).
    pub async fn push(&self, session: SessionId, turn: &ChatTurn, ttl_ms: u64) -> Result<(), GatewayError> {
        let id = crate::ids::new_event_id();
        let value = serde_json::to_value(turn)?;
        self.storage
            .hash_set(&history_key(session), &id.to_string(), value, ttl_ms, false)
            .await
            .map_err(|e| GatewayError::StorageListPushError(e.to_string()))
    }

    /// Ordered read of every turn still live for `session`. Per §4.7 there
    /// is no compaction: a session that just expired returns an empty
    /// range, not an error.
    pub async fn range(&self, session: SessionId) -> Result<Vec<ChatTurn>, GatewayError> {
        let mut fields = self
            .storage
            .hash_get_all(&history_key(session))
            .await
            .map_err(|e| GatewayError::HistoryGetError(e.to_string()))?;
        fields.sort_by(|a, b| {
            let ua: Option<Uuid> = a.0.parse().ok();
            let ub: Option<Uuid> = b.0.parse().ok();
            ua.cmp(&ub)
        });
        fields
            .into_iter()
            .map(|(_, value)| serde_json::from_value(value).map_err(GatewayError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_storage::MemoryStorage;

    #[tokio::test]
    async fn turns_come_back_in_append_order() {
        let store = HistoryStore::new(Arc::new(MemoryStorage::new()));
        let session = SessionId::new();
        for i in 0..5 {
            store
                .push(
                    session,
                    &ChatTurn {
                        prompt: format!("p{i}"),
                        response: format!("r{i}"),
                    },
                    60_000,
                )
                .await
                .unwrap();
        }
        let turns = store.range(session).await.unwrap();
        let prompts: Vec<_> = turns.iter().map(|t| t.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["p0", "p1", "p2", "p3", "p4"]);
    }

    #[tokio::test]
    async fn unknown_session_is_an_empty_range_not_an_error() {
        let store = HistoryStore::new(Arc::new(MemoryStorage::new()));
        let turns = store.range(SessionId::new()).await.unwrap();
        assert!(turns.is_empty());
    }

    #[tokio::test]
    async fn expired_session_returns_empty_range() {
        let store = HistoryStore::new(Arc::new(MemoryStorage::new()));
        let session = SessionId::new();
        store
            .push(
                session,
                &ChatTurn {
                    prompt: "p".into(),
                    response: "r".into(),
                },
                0,
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(store.range(session).await.unwrap().is_empty());
    }
}
