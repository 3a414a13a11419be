//! Warm-up persistence
//!
//! Two detached loops keep the working set alive across restarts: an
//! exporter that periodically snapshots the local cache's key set into the
//! remote store, and an importer that replays that snapshot through the
//! normal lookup pipeline on startup. The snapshot is advisory — replicas
//! overwrite each other's exports and re-priming is idempotent.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::time::{self, Instant};
use tracing::{error, info};

use crate::lru_cache::PriorityLruCache;
use crate::schema::Row;
use crate::storage::{EmissionSource, RemoteCache, Storage};
use crate::ProxyError;

/// Remote key holding the exported id list, stored without expiry.
pub const WARMING_UP_KEY: &str = "warmingUpKey";

/// Deadline for the one-shot startup import. Anything it misses is refilled
/// in the background by the regular pipeline.
const IMPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Spawn the exporter and the one-shot importer on the process lifetime.
pub async fn start<R, E>(
    client: redis::Client,
    period: Duration,
    local: Arc<PriorityLruCache<String, Row>>,
    storage: Arc<Storage<R, E>>,
) -> Result<(), ProxyError>
where
    R: RemoteCache,
    E: EmissionSource,
{
    let conn = ConnectionManager::new(client).await?;
    tokio::spawn(run_exporter(conn.clone(), period, local));
    tokio::spawn(run_importer(conn, storage));
    Ok(())
}

async fn run_exporter(
    mut conn: ConnectionManager,
    period: Duration,
    local: Arc<PriorityLruCache<String, Row>>,
) {
    let mut ticker = time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;

        let ids: Vec<String> = local
            .values()
            .into_iter()
            .map(|row| row.inventory_id)
            .collect();
        let payload = match serde_json::to_string(&ids) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "couldn't serialize warm-up key set");
                continue;
            }
        };
        if let Err(err) = conn.set::<_, _, ()>(WARMING_UP_KEY, payload).await {
            error!(error = %err, "couldn't export warm-up key set");
        }
    }
}

async fn run_importer<R, E>(mut conn: ConnectionManager, storage: Arc<Storage<R, E>>)
where
    R: RemoteCache,
    E: EmissionSource,
{
    let payload: Option<String> = match conn.get(WARMING_UP_KEY).await {
        Ok(payload) => payload,
        Err(err) => {
            error!(error = %err, "couldn't read warm-up key set");
            return;
        }
    };
    let Some(payload) = payload else {
        return;
    };
    let ids: Vec<String> = match serde_json::from_str(&payload) {
        Ok(ids) => ids,
        Err(err) => {
            error!(error = %err, "couldn't decode warm-up key set");
            return;
        }
    };
    if ids.is_empty() {
        return;
    }

    let id_map = ids
        .into_iter()
        .map(|id| (id.clone(), Row::pending(id, 0)))
        .collect();
    let deadline = Instant::now() + IMPORT_TIMEOUT;
    match storage.get(deadline, id_map).await {
        Ok(rows) => info!(count = rows.len(), "warm-up import primed the caches"),
        Err(err) => error!(error = %err, "warm-up import failed"),
    }
}
