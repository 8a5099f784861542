//! In-memory store used by tests and `SKIP_EXTERNALS` runs.
//!
//! Committed tables sit behind one `RwLock`. A unit of work stages its writes
//! in a private overlay that reads see first, and applies them in a single
//! write-locked step on commit. Contract locks are per-contract tokio mutexes
//! whose owned guard lives as long as the unit of work.

use crate::database::error::{StoreError, StoreResult};
use crate::database::repository::{
    check_version, ContractRegistry, DisbursementRepository, LoanStore, OutboxRepository,
    RepaymentRepository, ScheduleStore, UnitOfWork,
};
use crate::domain::schedule::due_order;
use crate::domain::{Contract, Disbursement, Repayment, ScheduleEntry, ScheduleStatus};
use crate::events::{LifecycleEvent, OutboxRecord};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    contracts: HashMap<Uuid, Contract>,
    schedule: HashMap<Uuid, ScheduleEntry>,
    disbursements: HashMap<Uuid, Disbursement>,
    repayments: HashMap<Uuid, Repayment>,
    outbox: Vec<OutboxRecord>,
    next_sequence: i64,
}

#[derive(Clone, Default)]
pub struct InMemoryLoanStore {
    tables: Arc<RwLock<Tables>>,
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryLoanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail after all staged writes were accepted.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub async fn contract(&self, id: Uuid) -> Option<Contract> {
        self.tables.read().await.contracts.get(&id).cloned()
    }

    pub async fn schedule(&self, contract_id: Uuid) -> Vec<ScheduleEntry> {
        let tables = self.tables.read().await;
        let mut entries: Vec<ScheduleEntry> = tables
            .schedule
            .values()
            .filter(|e| e.contract_id == contract_id)
            .cloned()
            .collect();
        entries.sort_by(due_order);
        entries
    }

    pub async fn repayments(&self, contract_id: Uuid) -> Vec<Repayment> {
        let tables = self.tables.read().await;
        let mut repayments: Vec<Repayment> = tables
            .repayments
            .values()
            .filter(|r| r.contract_id == contract_id)
            .cloned()
            .collect();
        repayments.sort_by_key(|r| r.created_at);
        repayments
    }

    pub async fn disbursements(&self, contract_id: Uuid) -> Vec<Disbursement> {
        let tables = self.tables.read().await;
        let mut disbursements: Vec<Disbursement> = tables
            .disbursements
            .values()
            .filter(|d| d.contract_id == contract_id)
            .cloned()
            .collect();
        disbursements.sort_by_key(|d| (d.created_at, d.installment_index));
        disbursements
    }

    pub async fn outbox(&self) -> Vec<OutboxRecord> {
        self.tables.read().await.outbox.clone()
    }

    async fn contract_lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }
}

#[async_trait]
impl LoanStore for InMemoryLoanStore {
    async fn begin(&self, lock: Option<Uuid>) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = match lock {
            Some(id) => Some(self.contract_lock(id).await),
            None => None,
        };
        Ok(Box::new(MemoryUnitOfWork {
            tables: self.tables.clone(),
            staged: Staged::default(),
            fail_commit: self.fail_next_commit.clone(),
            _guard: guard,
        }))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[derive(Default)]
struct Staged {
    contracts: HashMap<Uuid, Contract>,
    schedule: HashMap<Uuid, ScheduleEntry>,
    disbursements: HashMap<Uuid, Disbursement>,
    repayments: HashMap<Uuid, Repayment>,
    events: Vec<LifecycleEvent>,
    published: Vec<String>,
    failures: Vec<(String, String)>,
}

struct MemoryUnitOfWork {
    tables: Arc<RwLock<Tables>>,
    staged: Staged,
    fail_commit: Arc<AtomicBool>,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl MemoryUnitOfWork {
    async fn current_contract(&self, id: Uuid) -> Option<Contract> {
        match self.staged.contracts.get(&id) {
            Some(contract) => Some(contract.clone()),
            None => self.tables.read().await.contracts.get(&id).cloned(),
        }
    }

    async fn current_disbursement(&self, id: Uuid) -> Option<Disbursement> {
        match self.staged.disbursements.get(&id) {
            Some(d) => Some(d.clone()),
            None => self.tables.read().await.disbursements.get(&id).cloned(),
        }
    }

    async fn current_repayment(&self, id: Uuid) -> Option<Repayment> {
        match self.staged.repayments.get(&id) {
            Some(r) => Some(r.clone()),
            None => self.tables.read().await.repayments.get(&id).cloned(),
        }
    }

    async fn merged_schedule(&self) -> Vec<ScheduleEntry> {
        let tables = self.tables.read().await;
        let mut merged: HashMap<Uuid, ScheduleEntry> = tables.schedule.clone();
        for (id, entry) in &self.staged.schedule {
            merged.insert(*id, entry.clone());
        }
        merged.into_values().collect()
    }

    async fn merged_disbursements(&self) -> Vec<Disbursement> {
        let tables = self.tables.read().await;
        let mut merged = tables.disbursements.clone();
        for (id, d) in &self.staged.disbursements {
            merged.insert(*id, d.clone());
        }
        merged.into_values().collect()
    }

    async fn merged_repayments(&self) -> Vec<Repayment> {
        let tables = self.tables.read().await;
        let mut merged = tables.repayments.clone();
        for (id, r) in &self.staged.repayments {
            merged.insert(*id, r.clone());
        }
        merged.into_values().collect()
    }
}

#[async_trait]
impl ContractRegistry for MemoryUnitOfWork {
    async fn get_contract(&mut self, id: Uuid) -> StoreResult<Option<Contract>> {
        Ok(self.current_contract(id).await)
    }

    async fn insert_contract(&mut self, contract: &Contract) -> StoreResult<()> {
        if self.current_contract(contract.id).await.is_some() {
            return Err(StoreError::Duplicate {
                entity: "contract",
                key: contract.id.to_string(),
            });
        }
        self.staged.contracts.insert(contract.id, contract.clone());
        Ok(())
    }

    async fn save_contract(&mut self, contract: &Contract) -> StoreResult<()> {
        let stored = self
            .current_contract(contract.id)
            .await
            .ok_or_else(|| StoreError::NotFound {
                entity: "contract",
                id: contract.id.to_string(),
            })?;
        check_version("contract", contract.id, stored.version, contract.version)?;
        self.staged.contracts.insert(contract.id, contract.clone());
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for MemoryUnitOfWork {
    async fn find_schedule(
        &mut self,
        contract_id: Uuid,
        statuses: Option<&[ScheduleStatus]>,
    ) -> StoreResult<Vec<ScheduleEntry>> {
        let mut entries: Vec<ScheduleEntry> = self
            .merged_schedule()
            .await
            .into_iter()
            .filter(|e| e.contract_id == contract_id)
            .filter(|e| statuses.map_or(true, |s| s.contains(&e.status)))
            .collect();
        entries.sort_by(due_order);
        Ok(entries)
    }

    async fn insert_schedule(&mut self, entries: &[ScheduleEntry]) -> StoreResult<()> {
        for entry in entries {
            let exists = self.staged.schedule.contains_key(&entry.id)
                || self.tables.read().await.schedule.contains_key(&entry.id);
            if exists {
                return Err(StoreError::Duplicate {
                    entity: "schedule entry",
                    key: entry.id.to_string(),
                });
            }
            self.staged.schedule.insert(entry.id, entry.clone());
        }
        Ok(())
    }

    async fn save_schedule_entry(&mut self, entry: &ScheduleEntry) -> StoreResult<()> {
        let exists = self.staged.schedule.contains_key(&entry.id)
            || self.tables.read().await.schedule.contains_key(&entry.id);
        if !exists {
            return Err(StoreError::NotFound {
                entity: "schedule entry",
                id: entry.id.to_string(),
            });
        }
        self.staged.schedule.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn find_overdue_entries(
        &mut self,
        as_of: NaiveDate,
        limit: usize,
    ) -> StoreResult<Vec<ScheduleEntry>> {
        let mut entries: Vec<ScheduleEntry> = self
            .merged_schedule()
            .await
            .into_iter()
            .filter(|e| {
                matches!(e.status, ScheduleStatus::Pending | ScheduleStatus::Partial)
                    && e.due_date < as_of
            })
            .collect();
        entries.sort_by(|a, b| a.contract_id.cmp(&b.contract_id).then(due_order(a, b)));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[async_trait]
impl DisbursementRepository for MemoryUnitOfWork {
    async fn insert_disbursement(&mut self, disbursement: &Disbursement) -> StoreResult<()> {
        let duplicate = self
            .merged_disbursements()
            .await
            .iter()
            .any(|d| d.id == disbursement.id || d.reference == disbursement.reference);
        if duplicate {
            return Err(StoreError::Duplicate {
                entity: "disbursement",
                key: disbursement.reference.clone(),
            });
        }
        self.staged
            .disbursements
            .insert(disbursement.id, disbursement.clone());
        Ok(())
    }

    async fn update_disbursement(&mut self, disbursement: &Disbursement) -> StoreResult<()> {
        let stored = self
            .current_disbursement(disbursement.id)
            .await
            .ok_or_else(|| StoreError::NotFound {
                entity: "disbursement",
                id: disbursement.id.to_string(),
            })?;
        check_version(
            "disbursement",
            disbursement.id,
            stored.version,
            disbursement.version,
        )?;
        self.staged
            .disbursements
            .insert(disbursement.id, disbursement.clone());
        Ok(())
    }

    async fn get_disbursement(&mut self, id: Uuid) -> StoreResult<Option<Disbursement>> {
        Ok(self.current_disbursement(id).await)
    }

    async fn find_disbursement_by_reference(
        &mut self,
        reference: &str,
    ) -> StoreResult<Option<Disbursement>> {
        Ok(self
            .merged_disbursements()
            .await
            .into_iter()
            .find(|d| d.reference == reference))
    }

    async fn list_disbursements(&mut self, contract_id: Uuid) -> StoreResult<Vec<Disbursement>> {
        let mut disbursements: Vec<Disbursement> = self
            .merged_disbursements()
            .await
            .into_iter()
            .filter(|d| d.contract_id == contract_id)
            .collect();
        disbursements.sort_by_key(|d| (d.created_at, d.installment_index));
        Ok(disbursements)
    }
}

#[async_trait]
impl RepaymentRepository for MemoryUnitOfWork {
    async fn insert_repayment(&mut self, repayment: &Repayment) -> StoreResult<()> {
        let duplicate = self
            .merged_repayments()
            .await
            .iter()
            .any(|r| r.id == repayment.id || r.reference == repayment.reference);
        if duplicate {
            return Err(StoreError::Duplicate {
                entity: "repayment",
                key: repayment.reference.clone(),
            });
        }
        self.staged.repayments.insert(repayment.id, repayment.clone());
        Ok(())
    }

    async fn update_repayment(&mut self, repayment: &Repayment) -> StoreResult<()> {
        let stored = self
            .current_repayment(repayment.id)
            .await
            .ok_or_else(|| StoreError::NotFound {
                entity: "repayment",
                id: repayment.id.to_string(),
            })?;
        check_version("repayment", repayment.id, stored.version, repayment.version)?;
        self.staged.repayments.insert(repayment.id, repayment.clone());
        Ok(())
    }

    async fn get_repayment(&mut self, id: Uuid) -> StoreResult<Option<Repayment>> {
        Ok(self.current_repayment(id).await)
    }

    async fn find_repayment_by_reference(
        &mut self,
        reference: &str,
    ) -> StoreResult<Option<Repayment>> {
        Ok(self
            .merged_repayments()
            .await
            .into_iter()
            .find(|r| r.reference == reference))
    }

    async fn list_repayments(&mut self, contract_id: Uuid) -> StoreResult<Vec<Repayment>> {
        let mut repayments: Vec<Repayment> = self
            .merged_repayments()
            .await
            .into_iter()
            .filter(|r| r.contract_id == contract_id)
            .collect();
        repayments.sort_by_key(|r| r.created_at);
        Ok(repayments)
    }
}

#[async_trait]
impl OutboxRepository for MemoryUnitOfWork {
    async fn enqueue_event(&mut self, event: &LifecycleEvent) -> StoreResult<bool> {
        let staged = self
            .staged
            .events
            .iter()
            .any(|e| e.event_id == event.event_id);
        let committed = self
            .tables
            .read()
            .await
            .outbox
            .iter()
            .any(|r| r.event.event_id == event.event_id);
        if staged || committed {
            debug!(event_id = %event.event_id, "duplicate event ignored");
            return Ok(false);
        }
        self.staged.events.push(event.clone());
        Ok(true)
    }

    async fn fetch_unpublished(
        &mut self,
        limit: usize,
        max_attempts: i32,
    ) -> StoreResult<Vec<OutboxRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .outbox
            .iter()
            .filter(|r| r.published_at.is_none() && r.attempts < max_attempts)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&mut self, event_id: &str) -> StoreResult<()> {
        self.staged.published.push(event_id.to_string());
        Ok(())
    }

    async fn record_publish_failure(&mut self, event_id: &str, error: &str) -> StoreResult<()> {
        self.staged
            .failures
            .push((event_id.to_string(), error.to_string()));
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        if this.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::CommitFailed("injected commit failure".to_string()));
        }

        let mut tables = this.tables.write().await;

        // Versioned rows may have been written by a scope that did not hold
        // the contract lock.
        for contract in this.staged.contracts.values() {
            if let Some(stored) = tables.contracts.get(&contract.id) {
                if stored.version >= contract.version {
                    return Err(StoreError::VersionConflict {
                        entity: "contract",
                        id: contract.id.to_string(),
                        expected: contract.version - 1,
                    });
                }
            }
        }
        for d in this.staged.disbursements.values() {
            if let Some(stored) = tables.disbursements.get(&d.id) {
                if stored.version >= d.version {
                    return Err(StoreError::VersionConflict {
                        entity: "disbursement",
                        id: d.id.to_string(),
                        expected: d.version - 1,
                    });
                }
            }
        }
        for r in this.staged.repayments.values() {
            if let Some(stored) = tables.repayments.get(&r.id) {
                if stored.version >= r.version {
                    return Err(StoreError::VersionConflict {
                        entity: "repayment",
                        id: r.id.to_string(),
                        expected: r.version - 1,
                    });
                }
            }
        }

        let Staged {
            contracts,
            schedule,
            disbursements,
            repayments,
            events,
            published,
            failures,
        } = this.staged;

        tables.contracts.extend(contracts);
        tables.schedule.extend(schedule);
        tables.disbursements.extend(disbursements);
        tables.repayments.extend(repayments);

        for event in events {
            if tables.outbox.iter().any(|r| r.event.event_id == event.event_id) {
                continue;
            }
            tables.next_sequence += 1;
            let sequence = tables.next_sequence;
            tables.outbox.push(OutboxRecord {
                sequence,
                event,
                attempts: 0,
                last_error: None,
                published_at: None,
            });
        }

        let now = Utc::now();
        for event_id in published {
            if let Some(record) = tables.outbox.iter_mut().find(|r| r.event.event_id == event_id) {
                record.published_at = Some(now);
            }
        }
        for (event_id, error) in failures {
            if let Some(record) = tables.outbox.iter_mut().find(|r| r.event.event_id == event_id) {
                record.attempts += 1;
                record.last_error = Some(error);
            }
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
