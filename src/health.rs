//! Liveness report for the loan store and the event bus.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error};

use crate::events::EventBus;
use crate::services::TransactionCoordinator;

const STORE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    coordinator: Arc<TransactionCoordinator>,
    bus: Arc<dyn EventBus>,
}

impl HealthChecker {
    pub fn new(coordinator: Arc<TransactionCoordinator>, bus: Arc<dyn EventBus>) -> Self {
        Self { coordinator, bus }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health = HealthStatus::new();

        let store = self.probe_store().await;
        if store.status == ComponentState::Down {
            health.status = HealthState::Unhealthy;
        }
        health.checks.insert("store".to_string(), store);

        // Bus outages only delay the outbox; they do not fail the service.
        health.checks.insert(
            "event_bus".to_string(),
            ComponentHealth::up(None, Some(self.bus.name().to_string())),
        );

        health
    }

    async fn probe_store(&self) -> ComponentHealth {
        let backend = self.coordinator.backend();
        let started = Instant::now();
        let outcome = timeout(STORE_CHECK_TIMEOUT, async {
            let scope = self.coordinator.read().await?;
            scope.rollback().await
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                let elapsed = started.elapsed().as_millis();
                debug!(backend, response_time_ms = elapsed as u64, "Loan store reachable");
                ComponentHealth::up(Some(elapsed), Some(backend.to_string()))
            }
            Ok(Err(e)) => {
                error!(backend, error = %e, "Loan store probe failed");
                ComponentHealth::down(Some(e.to_string()))
            }
            Err(_) => {
                error!(backend, "Loan store probe timed out");
                ComponentHealth::down(Some("Timeout".to_string()))
            }
        }
    }
}
