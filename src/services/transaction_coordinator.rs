//! Atomic mutation scopes over the loan store.
//!
//! A [`TransactionScope`] wraps one unit of work. `begin` locks the contract
//! for the lifetime of the scope; dropping a scope without `commit` discards
//! every staged write and releases the lock, so an early `?` return is a
//! rollback.

use crate::database::{LoanStore, UnitOfWork};
use crate::error::LoanResult;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct TransactionCoordinator {
    store: Arc<dyn LoanStore>,
    outbox_signal: Arc<Notify>,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn LoanStore>) -> Self {
        Self {
            store,
            outbox_signal: Arc::new(Notify::new()),
        }
    }

    /// Notified after every successful commit.
    pub fn outbox_signal(&self) -> Arc<Notify> {
        self.outbox_signal.clone()
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Open a scope holding the contract lock.
    pub async fn begin(&self, contract_id: Uuid) -> LoanResult<TransactionScope> {
        let started = Instant::now();
        let uow = self.store.begin(Some(contract_id)).await?;
        debug!(
            contract_id = %contract_id,
            wait_ms = started.elapsed().as_millis() as u64,
            "transaction scope opened"
        );
        Ok(TransactionScope {
            uow,
            contract_id: Some(contract_id),
            signal: Some(self.outbox_signal.clone()),
            started,
        })
    }

    /// Open a scope without a contract lock, for lookups and the outbox.
    /// Committing it does not wake the outbox publisher.
    pub async fn read(&self) -> LoanResult<TransactionScope> {
        let uow = self.store.begin(None).await?;
        Ok(TransactionScope {
            uow,
            contract_id: None,
            signal: None,
            started: Instant::now(),
        })
    }
}

pub struct TransactionScope {
    uow: Box<dyn UnitOfWork>,
    contract_id: Option<Uuid>,
    signal: Option<Arc<Notify>>,
    started: Instant,
}

impl TransactionScope {
    pub fn contract_id(&self) -> Option<Uuid> {
        self.contract_id
    }

    pub async fn commit(self) -> LoanResult<()> {
        let contract_id = self.contract_id;
        let elapsed = self.started.elapsed();
        self.uow.commit().await.map_err(|e| {
            warn!(contract_id = ?contract_id, error = %e, "transaction commit failed");
            e
        })?;
        if let Some(signal) = &self.signal {
            signal.notify_one();
        }
        debug!(
            contract_id = ?contract_id,
            held_ms = elapsed.as_millis() as u64,
            "transaction scope committed"
        );
        Ok(())
    }

    pub async fn rollback(self) -> LoanResult<()> {
        let contract_id = self.contract_id;
        self.uow.rollback().await?;
        debug!(contract_id = ?contract_id, "transaction scope rolled back");
        Ok(())
    }
}

impl Deref for TransactionScope {
    type Target = dyn UnitOfWork;

    fn deref(&self) -> &Self::Target {
        &*self.uow
    }
}

impl DerefMut for TransactionScope {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.uow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ContractRegistry, InMemoryLoanStore};
    use crate::domain::Contract;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[tokio::test]
    async fn dropped_scope_discards_writes() {
        let store = InMemoryLoanStore::new();
        let coordinator = TransactionCoordinator::new(Arc::new(store.clone()));
        let contract = Contract::new("CTR-1", dec!(1000), dec!(0.1), 12, "KES");

        {
            let mut scope = coordinator.begin(contract.id).await.unwrap();
            scope.insert_contract(&contract).await.unwrap();
        }
        assert!(store.contract(contract.id).await.is_none());

        let mut scope = coordinator.begin(contract.id).await.unwrap();
        scope.insert_contract(&contract).await.unwrap();
        scope.commit().await.unwrap();
        assert!(store.contract(contract.id).await.is_some());
    }

    #[tokio::test]
    async fn commit_wakes_the_outbox() {
        let coordinator = TransactionCoordinator::new(Arc::new(InMemoryLoanStore::new()));
        let signal = coordinator.outbox_signal();

        let scope = coordinator.begin(Uuid::new_v4()).await.unwrap();
        scope.commit().await.unwrap();

        tokio::time::timeout(Duration::from_millis(100), signal.notified())
            .await
            .expect("commit should notify the outbox publisher");
    }

    #[tokio::test]
    async fn read_scope_commit_is_silent() {
        let coordinator = TransactionCoordinator::new(Arc::new(InMemoryLoanStore::new()));
        let signal = coordinator.outbox_signal();

        let scope = coordinator.read().await.unwrap();
        scope.commit().await.unwrap();

        assert!(
            tokio::time::timeout(Duration::from_millis(50), signal.notified())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn rollback_does_not_wake_the_outbox() {
        let coordinator = TransactionCoordinator::new(Arc::new(InMemoryLoanStore::new()));
        let signal = coordinator.outbox_signal();

        let scope = coordinator.begin(Uuid::new_v4()).await.unwrap();
        scope.rollback().await.unwrap();

        assert!(
            tokio::time::timeout(Duration::from_millis(50), signal.notified())
                .await
                .is_err()
        );
    }
}
