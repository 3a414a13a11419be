//! emproxy - latency-bounded caching proxy for emissions measurements
//!
//! Clients post batches of inventory identifiers (each with a priority) and
//! get back, within a tight per-request deadline, whatever emission
//! breakdowns are ready. Lookups fall through three tiers:
//! - L1: in-process priority-LRU cache (fastest)
//! - L2: Redis cache (medium speed, shared across instances)
//! - L3: the upstream emissions computation service
//!
//! The proxy supports:
//! - Best-effort partial responses under a per-request deadline
//! - Background refill of everything a deadline cut off
//! - Asynchronous write-back into both caches, never blocking a request
//! - Priority-weighted LRU eviction in the local tier
//! - Periodic refresh of cached entries and warm-up across restarts

pub mod config;
pub mod error;
pub mod handler;
pub mod lru_cache;
pub mod redis_cache;
pub mod schema;
pub mod service;
pub mod storage;
pub mod upstream;
pub mod warmup;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use handler::MeasureGetter;
pub use lru_cache::{CacheItem, PriorityLruCache};
pub use redis_cache::{Cacheable, RedisCache};
pub use schema::{EmissionsBreakdown, Row};
pub use service::MeasureService;
pub use storage::{EmissionSource, RemoteCache, Storage};
pub use upstream::{EmissionClient, EmissionGateway};
pub use warmup::WARMING_UP_KEY;

// Re-export async_trait for convenience
pub use async_trait::async_trait;
