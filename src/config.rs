//! Proxy configuration
//!
//! All options come from the environment (with a `.env` file honored by the
//! binary). Timeouts are read in milliseconds, periods in seconds.

use std::str::FromStr;
use std::time::Duration;

use crate::ProxyError;

/// Configuration for the emissions proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Inbound HTTP port
    pub port: u16,
    /// Redis host:port
    pub redis_addr: String,
    /// Redis password, empty for none
    pub redis_password: String,
    /// Redis logical database
    pub redis_db: i64,
    /// Depth of the remote tier's write-back queue
    pub redis_chan_size: usize,
    /// Capacity of the in-process cache
    pub lru_cache_size: usize,
    /// Depth of the in-process cache's write queue
    pub lru_chan_size: usize,
    /// Per-call deadline for the upstream emissions service
    pub emission_timeout: Duration,
    /// Interval between refreshes of already-cached entries
    pub update_cache_period: Duration,
    /// Per-request deadline for the measure endpoint
    pub request_timeout: Duration,
    /// Interval between warm-up key-set exports
    pub warmup_saver_period: Duration,
    /// Upstream emissions endpoint
    pub emission_url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            redis_addr: "127.0.0.1:6379".to_owned(),
            redis_password: String::new(),
            redis_db: 0,
            redis_chan_size: 1000,
            lru_cache_size: 1000,
            lru_chan_size: 1000,
            emission_timeout: Duration::from_millis(1000),
            update_cache_period: Duration::from_secs(86_400),
            request_timeout: Duration::from_millis(100),
            warmup_saver_period: Duration::from_secs(3600),
            emission_url: "http://localhost:8081/v2/measure".to_owned(),
        }
    }
}

impl ProxyConfig {
    /// Load the configuration from the environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self, ProxyError> {
        Ok(Self {
            port: parse_var("PORT", 8080)?,
            redis_addr: env_or("REDIS_ADDR", "127.0.0.1:6379"),
            redis_password: env_or("REDIS_PASSWORD", ""),
            redis_db: parse_var("REDIS_DB", 0)?,
            redis_chan_size: parse_var("REDIS_CHAN_SIZE", 1000)?,
            lru_cache_size: parse_var("LRU_CACHE_SIZE", 1000)?,
            lru_chan_size: parse_var("LRU_CHAN_SIZE", 1000)?,
            emission_timeout: Duration::from_millis(parse_var("EMISSION_TIMEOUT", 1000)?),
            update_cache_period: Duration::from_secs(parse_var("UPDATE_CACHE_PERIOD", 86_400)?),
            request_timeout: Duration::from_millis(parse_var("V1_MEASURE_TIMEOUT", 100)?),
            warmup_saver_period: Duration::from_secs(parse_var("WARMUP_SAVER_PERIOD", 3600)?),
            emission_url: env_or("EMISSION_URL", "http://localhost:8081/v2/measure"),
        })
    }

    /// Connection URL for the remote KV tier.
    pub fn redis_url(&self) -> String {
        if self.redis_password.is_empty() {
            format!("redis://{}/{}", self.redis_addr, self.redis_db)
        } else {
            format!(
                "redis://:{}@{}/{}",
                self.redis_password, self.redis_addr, self.redis_db
            )
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, ProxyError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ProxyError::Config(format!("can't parse {key}"))),
        Err(_) => Ok(default),
    }
}
