use crate::config::OverdueConfig;
use crate::services::repayment::OverdueSweep;
use crate::services::RepaymentOrchestrator;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct OverdueMonitorConfig {
    pub scan_interval: Duration,
    /// Maximum overdue entries picked up per sweep.
    pub batch_size: usize,
}

impl Default for OverdueMonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(3600),
            batch_size: 500,
        }
    }
}

impl From<&OverdueConfig> for OverdueMonitorConfig {
    fn from(config: &OverdueConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(config.scan_interval_secs),
            batch_size: config.batch_size,
        }
    }
}

/// Periodically marks past-due installments LATE.
pub struct OverdueMonitorWorker {
    repayments: Arc<RepaymentOrchestrator>,
    config: OverdueMonitorConfig,
}

impl OverdueMonitorWorker {
    pub fn new(repayments: Arc<RepaymentOrchestrator>, config: OverdueMonitorConfig) -> Self {
        Self { repayments, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            batch_size = self.config.batch_size,
            "overdue monitor worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("overdue monitor worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.scan_interval) => {
                    self.run_cycle().await;
                }
            }
        }

        info!("overdue monitor worker stopped");
    }

    pub async fn run_cycle(&self) -> OverdueSweep {
        let today = Utc::now().date_naive();
        match self.repayments.flag_overdue(today, self.config.batch_size).await {
            Ok(sweep) => {
                if sweep.failed_contracts > 0 {
                    warn!(
                        failed_contracts = sweep.failed_contracts,
                        "overdue sweep skipped contracts"
                    );
                }
                sweep
            }
            Err(e) => {
                warn!(error = %e, "overdue monitor cycle failed");
                OverdueSweep::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ContractRegistry, InMemoryLoanStore, LoanStore, ScheduleStore};
    use crate::domain::{Contract, ContractStatus, ScheduleEntry, ScheduleStatus};
    use crate::payments::GatewayRouter;
    use crate::services::TransactionCoordinator;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    async fn seeded_worker(scan_interval: Duration) -> (InMemoryLoanStore, Contract, OverdueMonitorWorker) {
        let store = InMemoryLoanStore::new();
        let contract = Contract::new("CTR-OVD", dec!(1000), dec!(0.10), 2, "KES")
            .with_status(ContractStatus::Active);
        let schedule = vec![
            ScheduleEntry::new(
                contract.id,
                1,
                NaiveDate::from_ymd_opt(2020, 1, 31).unwrap(),
                dec!(500),
                dec!(50),
            ),
            ScheduleEntry::new(
                contract.id,
                2,
                NaiveDate::from_ymd_opt(2999, 1, 31).unwrap(),
                dec!(500),
                dec!(50),
            ),
        ];
        let mut uow = store.begin(None).await.unwrap();
        uow.insert_contract(&contract).await.unwrap();
        uow.insert_schedule(&schedule).await.unwrap();
        uow.commit().await.unwrap();

        let coordinator = Arc::new(TransactionCoordinator::new(Arc::new(store.clone())));
        let repayments = Arc::new(RepaymentOrchestrator::new(
            coordinator,
            GatewayRouter::new(Duration::from_secs(1)),
        ));
        let worker = OverdueMonitorWorker::new(
            repayments,
            OverdueMonitorConfig {
                scan_interval,
                batch_size: 10,
            },
        );
        (store, contract, worker)
    }

    #[tokio::test]
    async fn cycle_flags_only_past_due_entries() {
        let (store, contract, worker) = seeded_worker(Duration::from_secs(3600)).await;

        let sweep = worker.run_cycle().await;
        assert_eq!(sweep.flagged, 1);
        assert_eq!(sweep.failed_contracts, 0);

        let schedule = store.schedule(contract.id).await;
        assert_eq!(schedule[0].status, ScheduleStatus::Late);
        assert_eq!(schedule[1].status, ScheduleStatus::Pending);

        assert_eq!(worker.run_cycle().await.flagged, 0);
    }

    #[tokio::test]
    async fn worker_sweeps_until_shutdown() {
        let (store, contract, worker) = seeded_worker(Duration::from_millis(10)).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop")
            .unwrap();

        assert_eq!(store.schedule(contract.id).await[0].status, ScheduleStatus::Late);
        let overdue = store
            .outbox()
            .await
            .iter()
            .filter(|r| r.event.event_type == "payment.overdue")
            .count();
        assert_eq!(overdue, 1);
    }
}
