use std::sync::Arc;
use std::time::Duration;

use digests_api::config::{CacheType, Config};
use digests_api::domain::color::ColorExtractor;
use digests_api::domain::metadata::MetadataExtractor;
use digests_api::domain::pipeline::{Dependencies, FeedPipeline};
use digests_api::infrastructure::cache::memory::MemoryCache;
use digests_api::infrastructure::cache::redis::RedisCache;
use digests_api::infrastructure::cache::sqlite::SqliteCache;
use digests_api::infrastructure::cache::Cache;
use digests_api::infrastructure::http_client::FetchClient;
use digests_api::infrastructure::worker_pool::WorkerPool;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "digests_api=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    let cache: Arc<dyn Cache> = match config.cache_type {
        CacheType::Memory => {
            tracing::info!("using in-memory cache");
            Arc::new(MemoryCache::with_sweep_interval(config.memory_cache_expiration))
        }
        CacheType::Sqlite => {
            tracing::info!(path = %config.sqlite_cache_path, "using sqlite cache");
            Arc::new(SqliteCache::open(&config.sqlite_cache_path).await?)
        }
        CacheType::Redis => {
            tracing::info!(address = %config.redis_address, "using redis cache");
            match RedisCache::connect(&config.redis_address, &config.redis_password, config.redis_db)
                .await
            {
                Ok(redis) => Arc::new(redis),
                Err(e) => {
                    tracing::error!(error = %e, "failed to connect to redis, falling back to in-memory cache");
                    Arc::new(MemoryCache::new())
                }
            }
        }
    };

    let http_client = Arc::new(FetchClient::new()?);
    let metadata = Arc::new(MetadataExtractor::new(http_client.clone()));
    let color = Arc::new(ColorExtractor::new(config.color_cache_days));

    let enrichment = Arc::new(WorkerPool::new(
        config.enrichment_workers,
        config.enrichment_queue_size,
        cache.clone(),
        color.clone(),
        metadata.clone(),
    ));
    enrichment.start().await;

    let deps = Arc::new(Dependencies {
        cache,
        http_client,
        metadata,
        color,
        enrichment,
        refresh_timer: config.refresh_timer,
        item_fanout_limit: config.enrichment_workers,
    });

    let pipeline = Arc::new(FeedPipeline::new(deps, config.pipeline_workers));
    let app = digests_api::build_router(pipeline, 120, Duration::from_secs(60));

    let bind_addr = format!("{}:{}", config.host, config.port);
    tracing::info!("digests-api listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, digests_api::into_make_service(app)).await?;

    Ok(())
}
