use std::env;
use std::time::Duration;

/// Which [`crate::infrastructure::cache::Cache`] backend to construct at
/// startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheType {
    Memory,
    Redis,
    Sqlite,
}

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub cache_type: CacheType,
    pub sqlite_cache_path: String,
    pub redis_address: String,
    pub redis_password: String,
    pub redis_db: i64,
    pub memory_cache_expiration: Duration,

    /// §4.8: age after which a cached feed is considered stale and a
    /// background refresh is kicked off.
    pub refresh_timer: Duration,
    /// §4.5: TTL for cached colors, including the sentinel.
    pub color_cache_days: i64,

    /// §4.7: enrichment worker pool sizing.
    pub enrichment_workers: usize,
    pub enrichment_queue_size: usize,
    /// §4.8: request-scoped per-URL fan-out bound, default = CPU count.
    pub pipeline_workers: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse::<u16>()?;

        let cache_type = match env::var("CACHE_TYPE")
            .unwrap_or_else(|_| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "redis" => CacheType::Redis,
            "sqlite" => CacheType::Sqlite,
            _ => CacheType::Memory,
        };

        let sqlite_cache_path =
            env::var("SQLITE_CACHE_PATH").unwrap_or_else(|_| "cache.db".to_string());
        let redis_address = env::var("REDIS_ADDRESS").unwrap_or_else(|_| "127.0.0.1:6379".to_string());
        let redis_password = env::var("REDIS_PASSWORD").unwrap_or_default();
        let redis_db = env::var("REDIS_DB")
            .unwrap_or_else(|_| "0".to_string())
            .parse::<i64>()?;

        let memory_cache_expiration = Duration::from_secs(
            env::var("MEMORY_CACHE_EXPIRATION")
                .unwrap_or_else(|_| "86400".to_string())
                .parse::<u64>()?,
        );

        let refresh_timer = Duration::from_secs(
            env::var("REFRESH_TIMER")
                .unwrap_or_else(|_| "60".to_string())
                .parse::<u64>()?
                * 60,
        );

        let color_cache_days = env::var("COLOR_CACHE_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse::<i64>()?;

        let enrichment_workers = env::var("ENRICHMENT_WORKERS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<usize>()?;
        let enrichment_queue_size = env::var("ENRICHMENT_QUEUE_SIZE")
            .unwrap_or_else(|_| "256".to_string())
            .parse::<usize>()?;
        let pipeline_workers = match env::var("PIPELINE_WORKERS") {
            Ok(v) => v.parse::<usize>()?,
            Err(_) => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        };

        Ok(Config {
            host,
            port,
            cache_type,
            sqlite_cache_path,
            redis_address,
            redis_password,
            redis_db,
            memory_cache_expiration,
            refresh_timer,
            color_cache_days,
            enrichment_workers,
            enrichment_queue_size,
            pipeline_workers,
        })
    }
}
