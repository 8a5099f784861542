use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error, info, warn};

use super::StoreError;
use crate::config::DatabaseConfig;

/// Sizing and lifetime limits for the Postgres pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl From<&DatabaseConfig> for PoolConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            min_connections: config.min_connections.min(config.max_connections),
            acquire_timeout: Duration::from_secs(config.connection_timeout),
            ..Self::default()
        }
    }
}

impl PoolConfig {
    fn options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
            .max_lifetime(self.max_lifetime)
    }
}

pub async fn init_pool(
    database_url: &str,
    config: Option<PoolConfig>,
) -> Result<PgPool, StoreError> {
    let config = config.unwrap_or_default();
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        acquire_timeout_secs = config.acquire_timeout.as_secs(),
        "Connecting loan store pool"
    );

    match config.options().connect(database_url).await {
        Ok(pool) => Ok(pool),
        Err(e) => {
            error!(error = %e, "Loan store pool could not connect");
            Err(StoreError::from_sqlx(e))
        }
    }
}

pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    init_pool(&config.url, Some(PoolConfig::from(config))).await
}

/// Apply the embedded migrations in `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database {
            message: format!("migration failed: {}", e),
            retryable: false,
        })
}

pub async fn health_check(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .map(|_| ())
        .map_err(|e| {
            warn!(error = %e, "Loan store ping failed");
            StoreError::from_sqlx(e)
        })
}
