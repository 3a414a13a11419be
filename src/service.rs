//! Request validation and shaping ahead of the coordinator

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::handler::MeasureGetter;
use crate::schema::Row;
use crate::storage::{EmissionSource, RemoteCache, Storage};
use crate::ProxyError;

/// De-duplicates incoming batches and hands them to the storage coordinator.
pub struct MeasureService<R, E> {
    storage: Arc<Storage<R, E>>,
}

impl<R, E> MeasureService<R, E>
where
    R: RemoteCache,
    E: EmissionSource,
{
    pub fn new(storage: Arc<Storage<R, E>>) -> Self {
        Self { storage }
    }

    /// An empty batch returns an empty result without touching any tier.
    /// Duplicate identifiers collapse to the first occurrence.
    pub async fn get(&self, deadline: Instant, rows: Vec<Row>) -> Result<Vec<Row>, ProxyError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let rows = remove_duplicates(rows);
        let id_map = collect_to_map(rows);
        self.storage.get(deadline, id_map).await
    }
}

#[async_trait]
impl<R, E> MeasureGetter for MeasureService<R, E>
where
    R: RemoteCache,
    E: EmissionSource,
{
    async fn get(&self, deadline: Instant, rows: Vec<Row>) -> Result<Vec<Row>, ProxyError> {
        MeasureService::get(self, deadline, rows).await
    }
}

/// Keep the first occurrence of each inventory id, priority included.
fn remove_duplicates(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.into_iter()
        .filter(|row| seen.insert(row.inventory_id.clone()))
        .collect()
}

fn collect_to_map(rows: Vec<Row>) -> HashMap<String, Row> {
    rows.into_iter()
        .map(|row| (row.inventory_id.clone(), row))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lru_cache::PriorityLruCache;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct MissRemote {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteCache for MissRemote {
        async fn batch_get(
            &self,
            keys: &[String],
        ) -> Result<(Vec<Row>, Vec<String>), ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((Vec::new(), keys.to_vec()))
        }

        fn update(&self, _keys: Vec<String>, _values: Vec<Row>) {}
    }

    /// Returns nothing but records the rows it was asked for.
    #[derive(Default)]
    struct RecordingUpstream {
        requests: Mutex<Vec<Vec<Row>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmissionSource for RecordingUpstream {
        async fn get_emissions(&self, rows: Vec<Row>) -> Result<Vec<Row>, ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().push(rows);
            Ok(Vec::new())
        }
    }

    fn build() -> (
        MeasureService<MissRemote, RecordingUpstream>,
        Arc<MissRemote>,
        Arc<RecordingUpstream>,
    ) {
        let local = PriorityLruCache::new(10, 10);
        let remote = Arc::new(MissRemote::default());
        let upstream = Arc::new(RecordingUpstream::default());
        let storage = Storage::new(
            local,
            Arc::clone(&remote),
            Arc::clone(&upstream),
            Duration::from_secs(3600),
        );
        (MeasureService::new(storage), remote, upstream)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn empty_batch_touches_no_tier() {
        let (service, remote, upstream) = build();
        let result = service.get(deadline(), Vec::new()).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicates_collapse_keeping_the_first_priority() {
        let (service, _remote, upstream) = build();
        let rows = vec![
            Row::pending("1", 1),
            Row::pending("1", 2),
            Row::pending("2", 2),
        ];
        service.get(deadline(), rows).await.unwrap();

        let requests = upstream.requests.lock();
        assert_eq!(requests.len(), 1);
        let mut asked = requests[0].clone();
        asked.sort_by(|a, b| a.inventory_id.cmp(&b.inventory_id));
        assert_eq!(asked.len(), 2);
        assert_eq!(asked[0].inventory_id, "1");
        assert_eq!(asked[0].priority, 1);
        assert_eq!(asked[1].inventory_id, "2");
        assert_eq!(asked[1].priority, 2);
    }

    #[test]
    fn remove_duplicates_keeps_input_order() {
        let rows = vec![
            Row::pending("1", 1),
            Row::pending("1", 2),
            Row::pending("2", 2),
        ];
        let deduped = remove_duplicates(rows);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].inventory_id, "1");
        assert_eq!(deduped[0].priority, 1);
        assert_eq!(deduped[1].inventory_id, "2");
    }

    #[test]
    fn collect_to_map_indexes_by_inventory_id() {
        let map = collect_to_map(vec![Row::pending("1", 1), Row::pending("2", 2)]);
        assert_eq!(map.len(), 2);
        assert_eq!(map["1"].priority, 1);
        assert_eq!(map["2"].priority, 2);
    }
}
