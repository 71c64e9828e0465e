use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::PgPool;

use crate::clock::{system_clock, SharedClock};
use crate::config::AppConfig;
use crate::db;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: reqwest::Client,
    pub clock: SharedClock,
    /// user_id -> role, short TTL so role changes take effect quickly.
    pub role_cache: Cache<String, String>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = db::build_pool(&config);
        if db_pool.is_none() {
            tracing::warn!("DATABASE_URL is not set — API will reject data requests");
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        let role_cache = Cache::builder()
            .time_to_live(Duration::from_secs(config.role_cache_ttl_seconds))
            .max_capacity(config.role_cache_max_entries)
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http_client,
            clock: system_clock(),
            role_cache,
        })
    }
}
