use super::LifecycleEvent;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    #[error("event bus unavailable: {0}")]
    Unavailable(String),

    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: &LifecycleEvent) -> Result<(), EventBusError>;

    fn name(&self) -> &'static str;
}

/// Process-local bus. Keeps every delivered event for inspection and fans
/// them out to broadcast subscribers; redelivered event ids are dropped the
/// way a deduplicating consumer would.
pub struct InMemoryEventBus {
    delivered: RwLock<Vec<LifecycleEvent>>,
    seen: RwLock<HashSet<String>>,
    sender: broadcast::Sender<LifecycleEvent>,
    offline: AtomicBool,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            delivered: RwLock::new(Vec::new()),
            seen: RwLock::new(HashSet::new()),
            sender,
            offline: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Simulate an outage: publishes fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn delivered(&self) -> Vec<LifecycleEvent> {
        self.delivered.read().await.clone()
    }

    pub async fn delivered_of(&self, event_type: &str) -> Vec<LifecycleEvent> {
        self.delivered
            .read()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: &LifecycleEvent) -> Result<(), EventBusError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(EventBusError::Unavailable("in-memory bus is offline".to_string()));
        }
        if !self.seen.write().await.insert(event.event_id.clone()) {
            return Ok(());
        }
        self.delivered.write().await.push(event.clone());
        // No subscribers is fine.
        let _ = self.sender.send(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
