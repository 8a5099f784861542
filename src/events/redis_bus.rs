//! Redis Streams event bus.
//!
//! Each event type is its own stream (`{prefix}:{eventType}`); entries carry
//! the event id and the JSON envelope.

use super::bus::{EventBus, EventBusError};
use super::LifecycleEvent;
use crate::config::EventBusConfig;
use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub type RedisPool = Pool<RedisConnectionManager>;

/// Build the connection pool. A failed initial PING is only logged: the
/// outbox keeps events until Redis comes back.
pub async fn init_redis_pool(config: &EventBusConfig) -> Result<RedisPool, EventBusError> {
    let redis_url = config
        .redis_url
        .as_deref()
        .ok_or_else(|| EventBusError::Unavailable("REDIS_URL is not set".to_string()))?;

    info!(
        max_connections = config.max_connections,
        "Initializing Redis event bus pool"
    );

    let manager = RedisConnectionManager::new(redis_url).map_err(|e| {
        error!("Failed to create Redis connection manager: {}", e);
        EventBusError::Unavailable(e.to_string())
    })?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .min_idle(Some(1))
        .connection_timeout(Duration::from_secs(5))
        .idle_timeout(Some(Duration::from_secs(60)))
        .build(manager)
        .await
        .map_err(|e| {
            error!("Failed to build Redis connection pool: {}", e);
            EventBusError::Unavailable(e.to_string())
        })?;

    if let Err(e) = ping(&pool).await {
        warn!("Initial Redis connection test failed, but continuing: {}", e);
    }

    Ok(pool)
}

pub async fn ping(pool: &RedisPool) -> Result<(), EventBusError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| EventBusError::Unavailable(format!("Pool error: {}", e)))?;
    let _: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(|e| EventBusError::Unavailable(e.to_string()))?;
    Ok(())
}

pub struct RedisStreamBus {
    pool: RedisPool,
    stream_prefix: String,
    max_len: usize,
}

impl RedisStreamBus {
    pub fn new(pool: RedisPool, config: &EventBusConfig) -> Self {
        Self {
            pool,
            stream_prefix: config.stream_prefix.clone(),
            max_len: config.stream_max_len,
        }
    }

    fn stream_key(&self, event: &LifecycleEvent) -> String {
        format!("{}:{}", self.stream_prefix, event.topic())
    }
}

#[async_trait]
impl EventBus for RedisStreamBus {
    async fn publish(&self, event: &LifecycleEvent) -> Result<(), EventBusError> {
        let payload = serde_json::to_string(event)?;
        let stream = self.stream_key(event);
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| EventBusError::Unavailable(format!("Pool error: {}", e)))?;

        let entry_id: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg("eventId")
            .arg(&event.event_id)
            .arg("payload")
            .arg(payload)
            .query_async(&mut *conn)
            .await
            .map_err(|e| EventBusError::Publish {
                topic: stream.clone(),
                message: e.to_string(),
            })?;

        debug!(stream = %stream, entry_id = %entry_id, event_id = %event.event_id, "event appended");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis_streams"
    }
}
