//! Narrow repository traits and the unit of work that bundles them.
//!
//! Every mutation happens through a [`UnitOfWork`] obtained from a
//! [`LoanStore`]. Nothing written through a unit of work is visible to other
//! readers until `commit`; dropping it without commit discards the writes.
//!
//! Versioned entities (contracts, disbursements, repayments) are saved with
//! their version already bumped by the caller; the store rejects the write
//! with [`StoreError::VersionConflict`] unless the stored copy is exactly one
//! version behind.

use crate::database::error::{StoreError, StoreResult};
use crate::domain::{Contract, Disbursement, Repayment, ScheduleEntry, ScheduleStatus};
use crate::events::{LifecycleEvent, OutboxRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

/// Contract terms and status, owned by the registry collaborator.
#[async_trait]
pub trait ContractRegistry: Send {
    async fn get_contract(&mut self, id: Uuid) -> StoreResult<Option<Contract>>;

    async fn insert_contract(&mut self, contract: &Contract) -> StoreResult<()>;

    async fn save_contract(&mut self, contract: &Contract) -> StoreResult<()>;
}

#[async_trait]
pub trait ScheduleStore: Send {
    /// Entries of a contract in due order, optionally limited to `statuses`.
    async fn find_schedule(
        &mut self,
        contract_id: Uuid,
        statuses: Option<&[ScheduleStatus]>,
    ) -> StoreResult<Vec<ScheduleEntry>>;

    async fn insert_schedule(&mut self, entries: &[ScheduleEntry]) -> StoreResult<()>;

    async fn save_schedule_entry(&mut self, entry: &ScheduleEntry) -> StoreResult<()>;

    /// Outstanding entries due strictly before `as_of` that are not LATE yet.
    async fn find_overdue_entries(
        &mut self,
        as_of: NaiveDate,
        limit: usize,
    ) -> StoreResult<Vec<ScheduleEntry>>;
}

#[async_trait]
pub trait DisbursementRepository: Send {
    async fn insert_disbursement(&mut self, disbursement: &Disbursement) -> StoreResult<()>;

    async fn update_disbursement(&mut self, disbursement: &Disbursement) -> StoreResult<()>;

    async fn get_disbursement(&mut self, id: Uuid) -> StoreResult<Option<Disbursement>>;

    async fn find_disbursement_by_reference(
        &mut self,
        reference: &str,
    ) -> StoreResult<Option<Disbursement>>;

    async fn list_disbursements(&mut self, contract_id: Uuid) -> StoreResult<Vec<Disbursement>>;
}

#[async_trait]
pub trait RepaymentRepository: Send {
    async fn insert_repayment(&mut self, repayment: &Repayment) -> StoreResult<()>;

    async fn update_repayment(&mut self, repayment: &Repayment) -> StoreResult<()>;

    async fn get_repayment(&mut self, id: Uuid) -> StoreResult<Option<Repayment>>;

    async fn find_repayment_by_reference(
        &mut self,
        reference: &str,
    ) -> StoreResult<Option<Repayment>>;

    async fn list_repayments(&mut self, contract_id: Uuid) -> StoreResult<Vec<Repayment>>;
}

#[async_trait]
pub trait OutboxRepository: Send {
    /// Returns false when an event with the same id is already queued.
    async fn enqueue_event(&mut self, event: &LifecycleEvent) -> StoreResult<bool>;

    /// Committed, unpublished rows in insertion order with fewer than
    /// `max_attempts` failed deliveries.
    async fn fetch_unpublished(
        &mut self,
        limit: usize,
        max_attempts: i32,
    ) -> StoreResult<Vec<OutboxRecord>>;

    async fn mark_published(&mut self, event_id: &str) -> StoreResult<()>;

    async fn record_publish_failure(&mut self, event_id: &str, error: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait UnitOfWork:
    ContractRegistry + ScheduleStore + DisbursementRepository + RepaymentRepository + OutboxRepository
{
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait LoanStore: Send + Sync {
    /// Open a unit of work. With `lock`, the contract is held exclusively
    /// until the unit of work ends.
    async fn begin(&self, lock: Option<Uuid>) -> StoreResult<Box<dyn UnitOfWork>>;

    fn backend(&self) -> &'static str;
}

pub(crate) fn check_version(
    entity: &'static str,
    id: impl ToString,
    stored: i64,
    incoming: i64,
) -> StoreResult<()> {
    if stored + 1 == incoming {
        Ok(())
    } else {
        Err(StoreError::VersionConflict {
            entity,
            id: id.to_string(),
            expected: incoming - 1,
        })
    }
}
