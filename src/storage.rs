//! Tiered emission storage
//!
//! The coordinator behind the measure endpoint. Lookups fall through three
//! tiers — the in-process priority-LRU, the remote KV tier, and the upstream
//! emissions service — under a caller-supplied deadline. Whatever a tier
//! cannot deliver before the deadline is returned as a partial result and
//! handed to a detached refill task, so the caches converge while the client
//! keeps its latency bound.
//!
//! Rows pulled out of the lower tiers are written back up with the priority
//! the client supplied for this request, not whatever priority the tier had
//! stored: eviction keys on current client intent, which shifts over time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::lru_cache::{CacheItem, PriorityLruCache};
use crate::schema::Row;
use crate::ProxyError;

/// Remote KV tier as the coordinator consumes it.
#[async_trait]
pub trait RemoteCache: Send + Sync + 'static {
    /// Multi-get: found values plus the keys that missed. A transport
    /// failure is an error with no partial result.
    async fn batch_get(&self, keys: &[String]) -> Result<(Vec<Row>, Vec<String>), ProxyError>;

    /// Fire-and-forget write-back.
    fn update(&self, keys: Vec<String>, values: Vec<Row>);
}

/// Upstream emissions computation as the coordinator consumes it.
#[async_trait]
pub trait EmissionSource: Send + Sync + 'static {
    /// Compute emissions for the given rows. The response may cover only a
    /// subset of the inputs.
    async fn get_emissions(&self, rows: Vec<Row>) -> Result<Vec<Row>, ProxyError>;
}

struct RemoteOutcome {
    found: Vec<Row>,
    missing: Vec<Row>,
}

/// Deadline-racing coordinator over the three tiers.
pub struct Storage<R, E> {
    local: Arc<PriorityLruCache<String, Row>>,
    remote: Arc<R>,
    upstream: Arc<E>,
}

impl<R, E> Storage<R, E>
where
    R: RemoteCache,
    E: EmissionSource,
{
    /// Build the storage and spawn the periodic refresh of cached entries.
    pub fn new(
        local: Arc<PriorityLruCache<String, Row>>,
        remote: Arc<R>,
        upstream: Arc<E>,
        refresh_period: std::time::Duration,
    ) -> Arc<Self> {
        let storage = Arc::new(Self {
            local,
            remote,
            upstream,
        });
        tokio::spawn(Arc::clone(&storage).run_refresh(refresh_period));
        storage
    }

    /// Return every row obtainable before `deadline`. Deadline expiry and
    /// tier failures downgrade to a partial result plus a background refill;
    /// they are never errors.
    pub async fn get(
        &self,
        deadline: Instant,
        id_map: HashMap<String, Row>,
    ) -> Result<Vec<Row>, ProxyError> {
        let keys: Vec<String> = id_map.keys().cloned().collect();

        let (mut result, missing_keys) = self.local.batch_get(&keys);
        if missing_keys.is_empty() {
            return Ok(result);
        }

        let missing_rows = rows_for(&missing_keys, &id_map);
        let remote_rx = self.spawn_remote_lookup(missing_rows.clone(), id_map.clone());

        let outcome = tokio::select! {
            biased;
            _ = time::sleep_until(deadline) => None,
            outcome = remote_rx => outcome.ok(),
        };
        let Some(outcome) = outcome else {
            self.schedule_refill(missing_rows, id_map);
            return Ok(result);
        };
        result.extend(outcome.found);
        if outcome.missing.is_empty() {
            return Ok(result);
        }

        let upstream_rx = self.spawn_upstream_fetch(outcome.missing.clone());
        let fetched = tokio::select! {
            biased;
            _ = time::sleep_until(deadline) => None,
            fetched = upstream_rx => fetched.ok().flatten(),
        };
        match fetched {
            Some(rows) => {
                let rows = stamp_priorities(rows, &id_map);
                self.remote.update(keys_of(&rows), rows.clone());
                self.local.update(to_cache_items(&rows));
                result.extend(rows);
            }
            None => self.schedule_refill(outcome.missing, id_map),
        }
        Ok(result)
    }

    /// Query the remote tier off-task. The result is sent first so the
    /// request is never delayed by the write-back that follows it.
    fn spawn_remote_lookup(
        &self,
        rows: Vec<Row>,
        id_map: HashMap<String, Row>,
    ) -> oneshot::Receiver<RemoteOutcome> {
        let (tx, rx) = oneshot::channel();
        let remote = Arc::clone(&self.remote);
        let local = Arc::clone(&self.local);
        tokio::spawn(async move {
            let keys = keys_of(&rows);
            let outcome = match remote.batch_get(&keys).await {
                Ok((found, missing_keys)) => RemoteOutcome {
                    found: stamp_priorities(found, &id_map),
                    missing: rows_for(&missing_keys, &id_map),
                },
                Err(err) => {
                    debug!(error = %err, "remote tier lookup failed, treating all keys as missing");
                    RemoteOutcome {
                        found: Vec::new(),
                        missing: rows,
                    }
                }
            };
            let items = to_cache_items(&outcome.found);
            let _ = tx.send(outcome);
            if !items.is_empty() {
                local.update(items);
            }
        });
        rx
    }

    fn spawn_upstream_fetch(&self, rows: Vec<Row>) -> oneshot::Receiver<Option<Vec<Row>>> {
        let (tx, rx) = oneshot::channel();
        let upstream = Arc::clone(&self.upstream);
        tokio::spawn(async move {
            let fetched = match upstream.get_emissions(rows).await {
                Ok(found) => Some(found),
                Err(err) => {
                    debug!(error = %err, "upstream fetch failed");
                    None
                }
            };
            let _ = tx.send(fetched);
        });
        rx
    }

    /// Fetch the rows a request could not wait for and push them into both
    /// caches. Detached from the client's deadline; failures are logged and
    /// dropped.
    fn schedule_refill(&self, rows: Vec<Row>, id_map: HashMap<String, Row>) {
        if rows.is_empty() {
            return;
        }
        let upstream = Arc::clone(&self.upstream);
        let remote = Arc::clone(&self.remote);
        let local = Arc::clone(&self.local);
        tokio::spawn(async move {
            let found = match upstream.get_emissions(rows).await {
                Ok(found) => found,
                Err(err) => {
                    debug!(error = %err, "background refill failed");
                    return;
                }
            };
            let found = stamp_priorities(found, &id_map);
            remote.update(keys_of(&found), found.clone());
            local.update(to_cache_items(&found));
        });
    }

    async fn run_refresh(self: Arc<Self>, period: std::time::Duration) {
        let mut ticker = time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.refresh().await;
        }
    }

    /// Re-fetch everything currently in the local cache and update both
    /// tiers, keeping the priorities the entries were stored under.
    async fn refresh(&self) {
        let snapshot = self.local.values();
        if snapshot.is_empty() {
            return;
        }
        let id_map: HashMap<String, Row> = snapshot
            .iter()
            .map(|row| (row.inventory_id.clone(), row.clone()))
            .collect();
        match self.upstream.get_emissions(snapshot).await {
            Ok(found) => {
                let found = stamp_priorities(found, &id_map);
                self.local.update(to_cache_items(&found));
                self.remote.update(keys_of(&found), found);
            }
            Err(err) => warn!(error = %err, "periodic refresh failed"),
        }
    }
}

fn keys_of(rows: &[Row]) -> Vec<String> {
    rows.iter().map(|row| row.inventory_id.clone()).collect()
}

fn rows_for(keys: &[String], id_map: &HashMap<String, Row>) -> Vec<Row> {
    keys.iter()
        .filter_map(|key| id_map.get(key).cloned())
        .collect()
}

fn stamp_priorities(mut rows: Vec<Row>, id_map: &HashMap<String, Row>) -> Vec<Row> {
    for row in &mut rows {
        if let Some(origin) = id_map.get(&row.inventory_id) {
            row.priority = origin.priority;
        }
    }
    rows
}

fn to_cache_items(rows: &[Row]) -> Vec<CacheItem<String, Row>> {
    rows.iter()
        .map(|row| CacheItem {
            key: row.inventory_id.clone(),
            value: row.clone(),
            priority: row.priority,
        })
        .collect()
}
