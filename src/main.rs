//! Emissions proxy entry point
//!
//! Loads configuration, wires the cache tiers behind the coordinator, and
//! serves the measure endpoint until interrupted.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use emproxy::handler::{self, MeasureGetter};
use emproxy::{
    warmup, EmissionClient, EmissionGateway, MeasureService, PriorityLruCache, ProxyConfig,
    ProxyError, RedisCache, Row, Storage,
};

#[tokio::main]
async fn main() -> Result<(), ProxyError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ProxyConfig::from_env()?;
    let redis_client = redis::Client::open(config.redis_url())?;

    let local = PriorityLruCache::new(config.lru_cache_size, config.lru_chan_size);
    let remote = RedisCache::<Row>::new(redis_client.clone(), config.redis_chan_size).await?;
    let emission_client =
        EmissionClient::new(config.emission_url.clone(), config.emission_timeout)?;
    let upstream = Arc::new(EmissionGateway::new(
        emission_client,
        config.emission_timeout,
    ));

    let storage = Storage::new(
        Arc::clone(&local),
        remote,
        upstream,
        config.update_cache_period,
    );

    warmup::start(
        redis_client,
        config.warmup_saver_period,
        Arc::clone(&local),
        Arc::clone(&storage),
    )
    .await?;

    let getter: Arc<dyn MeasureGetter> = Arc::new(MeasureService::new(storage));
    let app = handler::router(getter, config.request_timeout);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "emissions proxy listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    Ok(())
}
