//! Priority-aware LRU cache
//!
//! In-process bounded cache backed by a key map, a recency-ordered linked
//! list, and a priority histogram. Eviction deliberately inverts classic
//! LRU: the victim is the least-recently-used entry holding the *highest*
//! stored priority. High-priority items dominate the upstream and are cheap
//! to recompute relative to the value of keeping the long tail resident.
//!
//! Writes can be applied synchronously with [`PriorityLruCache::set`] or
//! enqueued with [`PriorityLruCache::update`], which never blocks the
//! caller: entries go through a bounded channel drained by one background
//! task, and a full channel falls back to a detached blocking send.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A pending cache write: key, value, and the priority the entry is stored
/// under.
#[derive(Debug, Clone)]
pub struct CacheItem<K, V> {
    pub key: K,
    pub value: V,
    pub priority: u32,
}

struct Node<K, V> {
    key: K,
    value: V,
    priority: u32,
    /// Toward the most-recently-used end
    prev: Option<usize>,
    /// Toward the least-recently-used end
    next: Option<usize>,
}

struct Inner<K, V> {
    capacity: usize,
    map: HashMap<K, usize>,
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    priority_count: HashMap<u32, usize>,
    max_priority: u32,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            priority_count: HashMap::new(),
            max_priority: 0,
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match &self.nodes[idx] {
            Some(node) => (node.prev, node.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(node) = self.nodes[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.nodes[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.nodes[h].as_mut() {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.attach_front(idx);
    }

    fn count_insertion(&mut self, priority: u32) {
        *self.priority_count.entry(priority).or_insert(0) += 1;
        if priority > self.max_priority {
            self.max_priority = priority;
        }
    }

    fn count_removal(&mut self, priority: u32) {
        if let Some(count) = self.priority_count.get_mut(&priority) {
            *count -= 1;
            if *count == 0 {
                self.priority_count.remove(&priority);
                if priority == self.max_priority {
                    self.max_priority = self.priority_count.keys().copied().max().unwrap_or(0);
                }
            }
        }
    }

    fn remove_index(&mut self, idx: usize) {
        self.detach(idx);
        if let Some(node) = self.nodes[idx].take() {
            self.map.remove(&node.key);
            self.count_removal(node.priority);
            self.free.push(idx);
        }
    }

    /// Walk from the LRU end toward the front and drop the first entry whose
    /// priority matches `max_priority`.
    fn evict_one(&mut self) {
        let mut cursor = self.tail;
        while let Some(idx) = cursor {
            let (priority, prev) = match &self.nodes[idx] {
                Some(node) => (node.priority, node.prev),
                None => break,
            };
            if priority == self.max_priority {
                self.remove_index(idx);
                return;
            }
            cursor = prev;
        }
    }

    fn set(&mut self, key: K, value: V, priority: u32) {
        let existing = self.map.get(&key).copied();
        if let Some(idx) = existing {
            let old_priority = match self.nodes[idx].as_mut() {
                Some(node) => {
                    let old = node.priority;
                    node.value = value;
                    node.priority = priority;
                    old
                }
                None => return,
            };
            if old_priority != priority {
                self.count_removal(old_priority);
                self.count_insertion(priority);
            }
            self.move_to_front(idx);
            return;
        }

        if self.map.len() == self.capacity {
            self.evict_one();
        }

        let node = Node {
            key: key.clone(),
            value,
            priority,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.attach_front(idx);
        self.map.insert(key, idx);
        self.count_insertion(priority);
    }
}

/// Bounded in-process cache with priority-weighted LRU eviction.
pub struct PriorityLruCache<K, V> {
    inner: RwLock<Inner<K, V>>,
    write_tx: mpsc::Sender<CacheItem<K, V>>,
}

impl<K, V> PriorityLruCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create the cache and spawn the single write-channel consumer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(capacity: usize, chan_size: usize) -> Arc<Self> {
        let (write_tx, rx) = mpsc::channel(chan_size.max(1));
        let cache = Arc::new(Self {
            inner: RwLock::new(Inner::new(capacity.max(1))),
            write_tx,
        });
        tokio::spawn(Arc::clone(&cache).run_writer(rx));
        cache
    }

    /// Look up one key, refreshing its recency on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        if !self.inner.read().map.contains_key(key) {
            return None;
        }
        let mut inner = self.inner.write();
        let idx = *inner.map.get(key)?;
        inner.move_to_front(idx);
        inner.nodes[idx].as_ref().map(|node| node.value.clone())
    }

    /// Look up many keys at once. Found values come back in key order along
    /// with the keys that missed (in the caller's input order).
    pub fn batch_get(&self, keys: &[K]) -> (Vec<V>, Vec<K>) {
        let mut inner = self.inner.write();
        let mut found = Vec::with_capacity(keys.len());
        let mut missing = Vec::new();
        for key in keys {
            match inner.map.get(key).copied() {
                Some(idx) => {
                    inner.move_to_front(idx);
                    if let Some(node) = inner.nodes[idx].as_ref() {
                        found.push(node.value.clone());
                    }
                }
                None => missing.push(key.clone()),
            }
        }
        debug!(hits = found.len(), misses = missing.len(), "local cache batch read");
        (found, missing)
    }

    /// Insert or overwrite an entry, evicting if a new key would exceed
    /// capacity.
    pub fn set(&self, key: K, value: V, priority: u32) {
        self.inner.write().set(key, value, priority);
    }

    /// Remove an entry if present.
    pub fn delete(&self, key: &K) {
        let mut inner = self.inner.write();
        let idx = inner.map.get(key).copied();
        if let Some(idx) = idx {
            inner.remove_index(idx);
        }
    }

    /// Enqueue entries for asynchronous insertion. Never blocks: a full
    /// channel hands the entry to a detached task that performs the
    /// blocking send.
    pub fn update(&self, items: Vec<CacheItem<K, V>>) {
        for item in items {
            match self.write_tx.try_send(item) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(item)) => {
                    let tx = self.write_tx.clone();
                    tokio::spawn(async move {
                        if tx.send(item).await.is_err() {
                            warn!("local cache write channel closed, dropping entry");
                        }
                    });
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!("local cache write channel closed, dropping entry");
                }
            }
        }
    }

    /// Snapshot of every stored value, in no particular order.
    pub fn values(&self) -> Vec<V> {
        let inner = self.inner.read();
        inner
            .map
            .values()
            .filter_map(|&idx| inner.nodes[idx].as_ref().map(|node| node.value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().map.is_empty()
    }

    async fn run_writer(self: Arc<Self>, mut rx: mpsc::Receiver<CacheItem<K, V>>) {
        while let Some(item) = rx.recv().await {
            self.set(item.key, item.value, item.priority);
        }
    }
}
