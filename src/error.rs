//! Proxy error types

use redis::RedisError;

/// Errors surfaced by the proxy's tiers and boundary.
///
/// Tier failures are downgraded to misses at the coordinator and never reach
/// the client; what remains here is what the boundary and bootstrap report.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("config error: {0}")]
    Config(String),
}
