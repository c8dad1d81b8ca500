use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::AsyncCommands;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::storage::{Notification, Storage, StorageResult};

const CHANNEL_CAPACITY: usize = 256;

struct LocalChannel {
    tx: broadcast::Sender<Notification>,
    refs: usize,
    task: JoinHandle<()>,
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// `Storage` backed by a Valkey/Redis-compatible server.
///
/// Commands run over one multiplexed connection (cheap, shareable across
/// concurrent callers). Pub/sub uses a second, dedicated connection per the
/// protocol constraint that most Redis-compatible servers refuse to mix
/// `SUBSCRIBE` with ordinary commands on the same connection — each local
/// subscription spawns a task reading that connection's message stream and
/// republishing onto a local broadcast channel, so repeated local
/// subscribers to the same key share one upstream `SUBSCRIBE` command.
pub struct ValkeyStorage {
    client: redis::Client,
    commands: Mutex<MultiplexedConnection>,
    channels: RwLock<HashMap<String, LocalChannel>>,
}

impl ValkeyStorage {
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| crate::storage::StorageError::Backend(e.to_string()))?;
        let commands = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| crate::storage::StorageError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            commands: Mutex::new(commands),
            channels: RwLock::new(HashMap::new()),
        })
    }

    async fn open_pubsub(&self, channel: &str) -> StorageResult<PubSub> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| crate::storage::StorageError::Backend(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| crate::storage::StorageError::Backend(e.to_string()))?;
        Ok(pubsub)
    }
}

#[async_trait]
impl Storage for ValkeyStorage {
    async fn init(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn value_get(&self, key: &str) -> StorageResult<Option<JsonValue>> {
        let mut conn = self.commands.lock().await;
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| crate::storage::StorageError::Backend(e.to_string()))?;
        raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
    }

    async fn value_set(&self, key: &str, value: JsonValue) -> StorageResult<()> {
        let raw = serde_json::to_string(&value)?;
        let mut conn = self.commands.lock().await;
        let _: () = conn
            .set(key, raw)
            .await
            .map_err(|e| crate::storage::StorageError::Backend(e.to_string()))?;
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
        let raw = serde_json::to_string(&value)?;
        let ttl_secs = ttl_ms.div_ceil(1000).max(1);
        {
            let mut conn = self.commands.lock().await;
            let _: () = conn
                .hset(key, field, &raw)
                .await
                .map_err(|e| crate::storage::StorageError::Backend(e.to_string()))?;
            let _: () = conn
                .expire(key, ttl_secs as i64)
                .await
                .map_err(|e| crate::storage::StorageError::Backend(e.to_string()))?;
        }
        if publish {
            let mut conn = self.commands.lock().await;
            let _: () = conn
                .publish(key, &raw)
                .await
                .map_err(|e| crate::storage::StorageError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StorageResult<Option<JsonValue>> {
        let mut conn = self.commands.lock().await;
        let raw: Option<String> = conn
            .hget(key, field)
            .await
            .map_err(|e| crate::storage::StorageError::Backend(e.to_string()))?;
        raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
    }

    async fn hash_get_all(&self, key: &str) -> StorageResult<Vec<(String, JsonValue)>> {
        let mut conn = self.commands.lock().await;
        let raw: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| crate::storage::StorageError::Backend(e.to_string()))?;
        raw.into_iter()
            .map(|(field, value)| Ok((field, serde_json::from_str(&value)?)))
            .collect()
    }

    async fn create_subscription(&self, channel: &str) -> StorageResult<()> {
        {
            let mut channels = self.channels.write().await;
            if let Some(entry) = channels.get_mut(channel) {
                entry.refs += 1;
                return Ok(());
            }
        }
        let pubsub = self.open_pubsub(channel).await?;
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let forward_tx = tx.clone();
        let channel_name = channel.to_string();
        let task = tokio::spawn(forward_pubsub(pubsub, channel_name, forward_tx));
        self.channels.write().await.insert(
            channel.to_string(),
            LocalChannel { tx, refs: 1, task },
        );
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

async fn forward_pubsub(mut pubsub: PubSub, channel: String, tx: broadcast::Sender<Notification>) {
    use futures_util::StreamExt;

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let Ok(payload) = msg.get_payload::<String>() else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<JsonValue>(&payload) else {
            continue;
        };
        let _ = tx.send(Notification {
            channel: channel.clone(),
            value,
        });
    }
}
