//! Remote KV cache tier
//!
//! Thin adapter over Redis: batch multi-get, single-key set with TTL, and a
//! fire-and-forget write-back queue drained by one background task. Values
//! are stored as JSON; an entry that fails to decode is reported as a miss
//! for its key, never as a transport error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::schema::Row;
use crate::storage::RemoteCache;
use crate::ProxyError;

/// Trait for values the remote tier can store.
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// TTL applied by the write-back drain loop.
const WRITEBACK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct PendingWrite<V> {
    key: String,
    value: V,
}

/// Redis-backed cache tier with an asynchronous write-back queue.
pub struct RedisCache<V> {
    conn: ConnectionManager,
    write_tx: mpsc::Sender<PendingWrite<V>>,
}

impl<V: Cacheable> RedisCache<V> {
    /// Connect and spawn the write-back consumer.
    pub async fn new(client: redis::Client, chan_size: usize) -> Result<Arc<Self>, ProxyError> {
        let conn = ConnectionManager::new(client).await?;
        let (write_tx, rx) = mpsc::channel(chan_size.max(1));
        let cache = Arc::new(Self {
            conn: conn.clone(),
            write_tx,
        });
        tokio::spawn(Self::run_writer(conn, rx));
        Ok(cache)
    }

    /// Multi-get. Keys that are absent or hold undecodable payloads come
    /// back in the missing list, preserving the input order.
    pub async fn batch_get(&self, keys: &[String]) -> Result<(Vec<V>, Vec<String>), ProxyError> {
        if keys.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = conn.mget(keys).await?;

        let mut found = Vec::with_capacity(keys.len());
        let mut missing = Vec::new();
        for (key, slot) in keys.iter().zip(raw) {
            match slot {
                Some(payload) => match decode::<V>(&payload) {
                    Ok(value) => found.push(value),
                    Err(err) => {
                        warn!(key = %key, error = %err, "undecodable remote entry treated as miss");
                        missing.push(key.clone());
                    }
                },
                None => missing.push(key.clone()),
            }
        }
        debug!(hits = found.len(), misses = missing.len(), "remote cache batch read");
        Ok((found, missing))
    }

    /// Store one value under `key` with the given expiry.
    pub async fn set(&self, key: &str, value: &V, ttl: Duration) -> Result<(), ProxyError> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, payload, ttl.as_secs()).await?;
        Ok(())
    }

    /// Enqueue write-backs without blocking the caller; a full channel hands
    /// the pair to a detached task that performs the blocking send.
    pub fn update(&self, keys: Vec<String>, values: Vec<V>) {
        for (key, value) in keys.into_iter().zip(values) {
            let write = PendingWrite { key, value };
            match self.write_tx.try_send(write) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(write)) => {
                    let tx = self.write_tx.clone();
                    tokio::spawn(async move {
                        if tx.send(write).await.is_err() {
                            warn!("remote write channel closed, dropping entry");
                        }
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("remote write channel closed, dropping entry");
                }
            }
        }
    }

    async fn run_writer(mut conn: ConnectionManager, mut rx: mpsc::Receiver<PendingWrite<V>>) {
        while let Some(write) = rx.recv().await {
            let payload = match serde_json::to_string(&write.value) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(key = %write.key, error = %err, "skipping unserializable write-back");
                    continue;
                }
            };
            if let Err(err) = conn
                .set_ex::<_, _, ()>(&write.key, payload, WRITEBACK_TTL.as_secs())
                .await
            {
                warn!(key = %write.key, error = %err, "remote write-back failed");
            }
        }
    }
}

fn decode<V: Cacheable>(payload: &str) -> Result<V, serde_json::Error> {
    serde_json::from_str(payload)
}

#[async_trait]
impl RemoteCache for RedisCache<Row> {
    async fn batch_get(&self, keys: &[String]) -> Result<(Vec<Row>, Vec<String>), ProxyError> {
        RedisCache::batch_get(self, keys).await
    }

    fn update(&self, keys: Vec<String>, values: Vec<Row>) {
        RedisCache::update(self, keys, values)
    }
}
