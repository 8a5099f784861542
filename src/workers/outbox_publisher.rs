//! Delivers committed outbox rows to the event bus.
//!
//! Rows are read in insertion order, published one by one and marked in the
//! same unit of work. Delivery is at-least-once: a crash between publish and
//! commit re-sends the batch, and consumers drop repeated `eventId`s.

use crate::config::OutboxConfig;
use crate::error::LoanResult;
use crate::events::{EventBus, OutboxRecord};
use crate::services::TransactionCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct OutboxPublisherConfig {
    /// Fallback wake-up when no commit signal arrives.
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Rows that failed this many times are left for manual inspection.
    pub max_attempts: i32,
}

impl Default for OutboxPublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            max_attempts: 10,
        }
    }
}

impl From<&OutboxConfig> for OutboxPublisherConfig {
    fn from(config: &OutboxConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            batch_size: config.batch_size,
            max_attempts: config.max_attempts,
        }
    }
}

/// Counts for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub published: usize,
    pub failed: usize,
}

pub struct OutboxPublisher {
    coordinator: Arc<TransactionCoordinator>,
    bus: Arc<dyn EventBus>,
    signal: Arc<Notify>,
    config: OutboxPublisherConfig,
}

impl OutboxPublisher {
    pub fn new(
        coordinator: Arc<TransactionCoordinator>,
        bus: Arc<dyn EventBus>,
        config: OutboxPublisherConfig,
    ) -> Self {
        let signal = coordinator.outbox_signal();
        Self {
            coordinator,
            bus,
            signal,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            bus = self.bus.name(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "outbox publisher started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("outbox publisher stopping");
                        break;
                    }
                }
                _ = self.signal.notified() => self.run_cycle().await,
                _ = tokio::time::sleep(self.config.poll_interval) => self.run_cycle().await,
            }
        }

        info!("outbox publisher stopped");
    }

    async fn run_cycle(&self) {
        match self.drain().await {
            Ok(report) if report.published + report.failed > 0 => {
                debug!(
                    published = report.published,
                    failed = report.failed,
                    "outbox drain finished"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "outbox publish cycle failed"),
        }
    }

    /// Publish pending rows until the outbox is empty or a delivery fails.
    pub async fn drain(&self) -> LoanResult<DrainReport> {
        let mut report = DrainReport::default();

        loop {
            let batch = self.publish_batch().await?;
            report.published += batch.published;
            report.failed += batch.failed;

            // A failing bus is retried on the next tick rather than in a tight loop.
            if batch.failed > 0 || batch.published < self.config.batch_size {
                break;
            }
        }

        Ok(report)
    }

    async fn publish_batch(&self) -> LoanResult<DrainReport> {
        let mut scope = self.coordinator.read().await?;
        let records = scope
            .fetch_unpublished(self.config.batch_size, self.config.max_attempts)
            .await?;

        let mut report = DrainReport::default();
        if records.is_empty() {
            scope.rollback().await?;
            return Ok(report);
        }

        for record in records {
            match self.bus.publish(&record.event).await {
                Ok(()) => {
                    scope.mark_published(&record.event.event_id).await?;
                    report.published += 1;
                }
                Err(e) => {
                    let message = e.to_string();
                    scope
                        .record_publish_failure(&record.event.event_id, &message)
                        .await?;
                    self.log_failure(&record, &message);
                    report.failed += 1;
                }
            }
        }

        scope.commit().await?;
        Ok(report)
    }

    fn log_failure(&self, record: &OutboxRecord, message: &str) {
        let attempts = record.attempts + 1;
        if attempts >= self.config.max_attempts {
            error!(
                event_id = %record.event.event_id,
                event_type = %record.event.event_type,
                attempts,
                error = %message,
                "outbox event abandoned after max attempts"
            );
        } else {
            warn!(
                event_id = %record.event.event_id,
                event_type = %record.event.event_type,
                attempts,
                error = %message,
                "outbox event publish failed"
            );
        }
    }
}
