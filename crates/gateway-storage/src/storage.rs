use async_trait::async_trait;
use serde_json::Value as JsonValue;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

/// A single subscribed frame: the raw JSON value most recently written to
/// `channel` via a `publish = true` hash write.
#[derive(Debug, Clone)]
pub struct Notification {
    pub channel: String,
    pub value: JsonValue,
}

/// The capability set every gateway component talks to instead of a concrete
/// backend: opaque key/value, a map-per-key with a whole-key TTL, and
/// channel-scoped pub/sub. Concrete backends: in-memory (`MemoryStorage`)
/// and Valkey/Redis-compatible (`ValkeyStorage`).
#[async_trait]
pub trait Storage: Send + Sync {
    async fn init(&self) -> StorageResult<()>;
    async fn close(&self) -> StorageResult<()>;

    async fn value_get(&self, key: &str) -> StorageResult<Option<JsonValue>>;
    async fn value_set(&self, key: &str, value: JsonValue) -> StorageResult<()>;

    /// Sets one field of the hash at `key`, refreshing the whole-key TTL.
    /// When `publish` is true, the write is also broadcast on channel `key`.
    async fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: JsonValue,
        ttl_ms: u64,
        publish: bool,
    ) -> StorageResult<()>;
    async fn hash_get(&self, key: &str, field: &str) -> StorageResult<Option<JsonValue>>;
    async fn hash_get_all(&self, key: &str) -> StorageResult<Vec<(String, JsonValue)>>;

    /// Registers interest in `channel`; reference-counted, so the backend
    /// only tears down its subscription once the last caller unsubscribes.
    async fn create_subscription(&self, channel: &str) -> StorageResult<()>;
    async fn remove_subscription(&self, channel: &str) -> StorageResult<()>;

    /// Returns a receiver of every [`Notification`] published on `channel`
    /// from the moment of the call onward.
    async fn subscribe(&self, channel: &str) -> StorageResult<tokio::sync::broadcast::Receiver<Notification>>;
    async fn unsubscribe(&self, channel: &str);
}
