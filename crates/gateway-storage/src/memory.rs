use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, RwLock};

use crate::storage::{Notification, Storage, StorageResult};

const CHANNEL_CAPACITY: usize = 256;

struct HashEntry {
    fields: HashMap<String, JsonValue>,
    expires_at: Instant,
}

struct Channel {
    tx: broadcast::Sender<Notification>,
    refs: usize,
}

/// In-process `Storage` backed by concurrency-safe maps. Expiry is checked
/// opportunistically on read and write rather than by a background
/// sweeper. Pub/sub is in-process: one `broadcast::Sender` per subscribed
/// key, generalizing the single shared event hub pattern to per-key
/// channels.
#[derive(Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<String, JsonValue>>,
    hashes: RwLock<HashMap<String, HashEntry>>,
    channels: RwLock<HashMap<String, Channel>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn init(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn value_get(&self, key: &str) -> StorageResult<Option<JsonValue>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn value_set(&self, key: &str, value: JsonValue) -> StorageResult<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: JsonValue,
        ttl_ms: u64,
        publish: bool,
    ) -> StorageResult<()> {
        let expires_at = Instant::now() + Duration::from_millis(ttl_ms);
        {
            let mut hashes = self.hashes.write().await;
            let entry = hashes.entry(key.to_string()).or_insert_with(|| HashEntry {
                fields: HashMap::new(),
                expires_at,
            });
            entry.fields.insert(field.to_string(), value.clone());
            entry.expires_at = expires_at;
        }
        if publish {
            let channels = self.channels.read().await;
            if let Some(channel) = channels.get(key) {
                let _ = channel.tx.send(Notification {
                    channel: key.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StorageResult<Option<JsonValue>> {
        let mut hashes = self.hashes.write().await;
        let Some(entry) = hashes.get(key) else {
            return Ok(None);
        };
        if entry.expires_at <= Instant::now() {
            hashes.remove(key);
            return Ok(None);
        }
        Ok(entry.fields.get(field).cloned())
    }

    async fn hash_get_all(&self, key: &str) -> StorageResult<Vec<(String, JsonValue)>> {
        let mut hashes = self.hashes.write().await;
        let Some(entry) = hashes.get(key) else {
            return Ok(Vec::new());
        };
        if entry.expires_at <= Instant::now() {
            hashes.remove(key);
            return Ok(Vec::new());
        }
        Ok(entry
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn create_subscription(&self, channel: &str) -> StorageResult<()> {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .and_modify(|c| c.refs += 1)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
                Channel { tx, refs: 1 }
            });
        Ok(())
    }

    async fn remove_subscription(&self, channel: &str) -> StorageResult<()> {
        let mut channels = self.channels.write().await;
        if let Some(entry) = channels.get_mut(channel) {
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                channels.remove(channel);
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> StorageResult<broadcast::Receiver<Notification>> {
        self.create_subscription(channel).await?;
        let channels = self.channels.read().await;
        Ok(channels
            .get(channel)
            .expect("just created above")
            .tx
            .subscribe())
    }

    async fn unsubscribe(&self, channel: &str) {
        let _ = self.remove_subscription(channel).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn value_round_trips() {
        let storage = MemoryStorage::new();
        storage.value_set("k", json!({"a": 1})).await.unwrap();
        assert_eq!(storage.value_get("k").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(storage.value_get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hash_set_refreshes_ttl_and_reads_back() {
        let storage = MemoryStorage::new();
        storage
            .hash_set("h", "f1", json!("v1"), 60_000, false)
            .await
            .unwrap();
        storage
            .hash_set("h", "f2", json!("v2"), 60_000, false)
            .await
            .unwrap();
        let all = storage.hash_get_all("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(storage.hash_get("h", "f1").await.unwrap(), Some(json!("v1")));
    }

    #[tokio::test]
    async fn expired_hash_reads_as_empty() {
        let storage = MemoryStorage::new();
        storage.hash_set("h", "f", json!(1), 0, false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(storage.hash_get("h", "f").await.unwrap(), None);
        assert!(storage.hash_get_all("h").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_is_observed_by_active_subscriber() {
        let storage = MemoryStorage::new();
        let mut rx = storage.subscribe("chan").await.unwrap();
        storage
            .hash_set("chan", "f", json!("hello"), 60_000, true)
            .await
            .unwrap();
        let note = rx.recv().await.unwrap();
        assert_eq!(note.channel, "chan");
        assert_eq!(note.value, json!("hello"));
    }

    #[tokio::test]
    async fn publish_without_subscriber_does_not_error() {
        let storage = MemoryStorage::new();
        storage
            .hash_set("chan", "f", json!("hello"), 60_000, true)
            .await
            .unwrap();
    }
}
