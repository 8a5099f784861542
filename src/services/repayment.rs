//! Debt reduction workflow.
//!
//! A repayment is allocated against the contract's outstanding schedule
//! inside one contract-locked scope: schedule entries, the repayment, the
//! contract summary and the outbox rows commit together or not at all.

use crate::domain::contract::ContractSummary;
use crate::domain::{
    generate_reference, Contract, ContractStatus, PaymentType, Repayment, RepaymentStatus,
    ScheduleStatus,
};
use crate::error::{LoanError, LoanResult};
use crate::events::{EventKind, LifecycleEvent};
use crate::payments::types::{
    CallbackStatus, Destination, GatewayRequest, GatewayStatus, PaymentChannel,
    PaymentDirection, TIMEOUT_REASON,
};
use crate::payments::GatewayRouter;
use crate::services::allocation::{AllocationEngine, AllocationPlan, AllocationRequest};
use crate::services::transaction_coordinator::{TransactionCoordinator, TransactionScope};
use crate::services::{load_contract, validate_amount, validate_currency};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewRepayment {
    pub contract_id: Uuid,
    pub amount: Decimal,
    pub payment_type: PaymentType,
    pub schedule_ids: Vec<Uuid>,
    pub destination: Destination,
    pub currency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RepaymentOutcome {
    pub repayment: Repayment,
    pub contract: ContractSummary,
}

#[derive(Debug, Clone)]
pub struct RepaymentConfirmation {
    pub repayment: Repayment,
    pub contract: ContractSummary,
    /// The status was already recorded; nothing changed.
    pub replayed: bool,
}

/// Totals of one overdue sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverdueSweep {
    pub flagged: usize,
    pub contracts: usize,
    pub failed_contracts: usize,
}

pub struct RepaymentOrchestrator {
    coordinator: Arc<TransactionCoordinator>,
    gateways: GatewayRouter,
}

impl RepaymentOrchestrator {
    pub fn new(coordinator: Arc<TransactionCoordinator>, gateways: GatewayRouter) -> Self {
        Self {
            coordinator,
            gateways,
        }
    }

    pub async fn create(&self, actor: Uuid, request: NewRepayment) -> LoanResult<RepaymentOutcome> {
        validate_amount(request.amount, "amount")?;
        request.destination.validate()?;
        let channel = request.destination.channel();
        if !self.gateways.supports(channel) {
            return Err(LoanError::invalid_field(
                "paymentMethod",
                format!("{} is not available", channel),
            ));
        }

        let mut scope = self.coordinator.begin(request.contract_id).await?;
        let mut contract = load_contract(&mut *scope, request.contract_id).await?;
        ensure_repayable(&contract)?;
        validate_currency(&contract, request.currency.as_deref())?;

        // Policy errors reject the request before anything is written.
        let now = Utc::now();
        let plan = self
            .plan(
                &mut scope,
                &contract,
                request.amount,
                request.payment_type,
                &request.schedule_ids,
                now,
            )
            .await?;

        let mut repayment = Repayment {
            id: Uuid::new_v4(),
            reference: generate_reference("RPY", now),
            contract_id: contract.id,
            amount: request.amount,
            settled_amount: None,
            unallocated_amount: Decimal::ZERO,
            currency: contract.currency.clone(),
            status: RepaymentStatus::Pending,
            payment_type: request.payment_type,
            target_schedule_ids: request.schedule_ids,
            channel,
            destination: request.destination,
            allocation: Vec::new(),
            external_transaction_id: None,
            failure_reason: None,
            created_by: actor,
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        scope.insert_repayment(&repayment).await?;

        info!(
            repayment_id = %repayment.id,
            contract_id = %contract.id,
            reference = %repayment.reference,
            amount = %repayment.amount,
            payment_type = %repayment.payment_type,
            channel = %channel,
            "Repayment created"
        );

        if channel == PaymentChannel::BankTransfer {
            // Bank transfers are pushed by the payer; the bank confirms later.
            scope
                .enqueue_event(&LifecycleEvent::repayment(
                    EventKind::RepaymentInitiated,
                    &repayment,
                    &contract,
                ))
                .await?;
            scope.commit().await?;
            info!(reference = %repayment.reference, "Repayment awaiting bank confirmation");
            return Ok(RepaymentOutcome {
                repayment,
                contract: ContractSummary::from(&contract),
            });
        }

        let response = self.gateways.execute(&collection_request(&repayment)).await;
        match response.status {
            GatewayStatus::Completed => {
                let settled = settled_amount(repayment.amount, response.settled_amount);
                let plan = if settled == repayment.amount {
                    plan
                } else {
                    settlement_plan(&mut scope, &contract, &repayment, settled, now).await?
                };
                settle(
                    &mut scope,
                    &mut contract,
                    &mut repayment,
                    plan,
                    settled,
                    response.external_transaction_id,
                )
                .await?;
                scope.commit().await?;
            }
            GatewayStatus::Pending => {
                repayment.external_transaction_id = response.external_transaction_id;
                repayment.advance(RepaymentStatus::Processing);
                scope.update_repayment(&repayment).await?;
                scope
                    .enqueue_event(&LifecycleEvent::repayment(
                        EventKind::RepaymentInitiated,
                        &repayment,
                        &contract,
                    ))
                    .await?;
                scope.commit().await?;
                info!(reference = %repayment.reference, "Repayment awaiting operator confirmation");
            }
            GatewayStatus::Failed => {
                // Nothing of the attempt survives except the FAILED record.
                scope.rollback().await?;
                let reason = response
                    .failure_reason
                    .unwrap_or_else(|| "unknown gateway failure".to_string());
                let reference = repayment.reference.clone();
                self.record_failure(repayment, &reason).await?;
                return Err(LoanError::Gateway {
                    message: reason,
                    retryable: response.retryable,
                    reference: Some(reference),
                });
            }
        }

        Ok(RepaymentOutcome {
            repayment,
            contract: ContractSummary::from(&contract),
        })
    }

    /// Settle or fail a repayment awaiting confirmation. The allocation is
    /// recomputed against the schedule as it is now; a collection the channel
    /// confirmed always settles, even when the schedule moved underneath it.
    pub async fn confirm(
        &self,
        reference: &str,
        status: CallbackStatus,
        external_transaction_id: Option<String>,
        settled: Option<Decimal>,
        reason: Option<String>,
    ) -> LoanResult<RepaymentConfirmation> {
        let contract_id = {
            let mut scope = self.coordinator.read().await?;
            scope
                .find_repayment_by_reference(reference)
                .await?
                .ok_or_else(|| LoanError::not_found("repayment", reference))?
                .contract_id
        };
        let mut scope = self.coordinator.begin(contract_id).await?;
        let mut repayment = scope
            .find_repayment_by_reference(reference)
            .await?
            .ok_or_else(|| LoanError::not_found("repayment", reference))?;
        let mut contract = load_contract(&mut *scope, contract_id).await?;

        let recorded = repayment.status;
        let timed_out = repayment.failure_reason.as_deref() == Some(TIMEOUT_REASON);
        match (recorded, status) {
            (RepaymentStatus::Completed | RepaymentStatus::Partial, CallbackStatus::Completed)
            | (RepaymentStatus::Failed, CallbackStatus::Failed) => {
                info!(reference = %reference, status = %status, "Duplicate repayment callback ignored");
                return Ok(RepaymentConfirmation {
                    repayment,
                    contract: ContractSummary::from(&contract),
                    replayed: true,
                });
            }
            (RepaymentStatus::Failed, CallbackStatus::Completed) if timed_out => {
                warn!(
                    reference = %reference,
                    "Timed-out repayment settled by the channel after the fact"
                );
            }
            (RepaymentStatus::Pending | RepaymentStatus::Processing, _) => {}
            _ => {
                return Err(LoanError::ReconciliationConflict {
                    reference: reference.to_string(),
                    recorded: recorded.to_string(),
                    received: status.to_string(),
                });
            }
        }

        if external_transaction_id.is_some() {
            repayment.external_transaction_id = external_transaction_id;
        }

        match status {
            CallbackStatus::Completed => {
                let settled = settled_amount(repayment.amount, settled);
                let plan =
                    settlement_plan(&mut scope, &contract, &repayment, settled, Utc::now()).await?;
                repayment.failure_reason = None;
                let external = repayment.external_transaction_id.clone();
                settle(&mut scope, &mut contract, &mut repayment, plan, settled, external).await?;
            }
            CallbackStatus::Failed => {
                repayment.failure_reason =
                    Some(reason.unwrap_or_else(|| "declined by channel".to_string()));
                repayment.advance(RepaymentStatus::Failed);
                scope.update_repayment(&repayment).await?;
                scope
                    .enqueue_event(&LifecycleEvent::repayment(
                        EventKind::RepaymentFailed,
                        &repayment,
                        &contract,
                    ))
                    .await?;
                warn!(reference = %reference, "Repayment failed at the channel");
            }
        }
        scope.commit().await?;

        Ok(RepaymentConfirmation {
            repayment,
            contract: ContractSummary::from(&contract),
            replayed: false,
        })
    }

    /// Mark outstanding entries due before `as_of` LATE and emit one
    /// `payment.overdue` per entry. Contracts are processed one scope at a
    /// time; a failing contract does not stop the sweep.
    pub async fn flag_overdue(&self, as_of: NaiveDate, limit: usize) -> LoanResult<OverdueSweep> {
        let candidates = {
            let mut scope = self.coordinator.read().await?;
            scope.find_overdue_entries(as_of, limit).await?
        };

        let mut by_contract: BTreeMap<Uuid, usize> = BTreeMap::new();
        for entry in &candidates {
            *by_contract.entry(entry.contract_id).or_default() += 1;
        }

        let mut sweep = OverdueSweep::default();
        for contract_id in by_contract.keys() {
            match self.flag_contract_overdue(*contract_id, as_of).await {
                Ok(flagged) => {
                    sweep.flagged += flagged;
                    sweep.contracts += 1;
                }
                Err(e) => {
                    sweep.failed_contracts += 1;
                    error!(contract_id = %contract_id, error = %e, "Overdue sweep failed for contract");
                }
            }
        }

        if sweep.flagged > 0 {
            info!(
                as_of = %as_of,
                flagged = sweep.flagged,
                contracts = sweep.contracts,
                "Overdue schedule entries flagged"
            );
        }
        Ok(sweep)
    }

    async fn flag_contract_overdue(&self, contract_id: Uuid, as_of: NaiveDate) -> LoanResult<usize> {
        let mut scope = self.coordinator.begin(contract_id).await?;
        let contract = load_contract(&mut *scope, contract_id).await?;
        let entries = scope
            .find_schedule(
                contract_id,
                Some(&[ScheduleStatus::Pending, ScheduleStatus::Partial]),
            )
            .await?;

        let mut flagged = 0;
        for mut entry in entries.into_iter().filter(|e| e.due_date < as_of) {
            entry.status = ScheduleStatus::Late;
            scope.save_schedule_entry(&entry).await?;
            scope
                .enqueue_event(&LifecycleEvent::payment_overdue(&entry, &contract))
                .await?;
            flagged += 1;
        }
        scope.commit().await?;
        Ok(flagged)
    }

    pub async fn get(&self, id: Uuid) -> LoanResult<Repayment> {
        let mut scope = self.coordinator.read().await?;
        scope
            .get_repayment(id)
            .await?
            .ok_or_else(|| LoanError::not_found("repayment", id))
    }

    async fn plan(
        &self,
        scope: &mut TransactionScope,
        contract: &Contract,
        amount: Decimal,
        payment_type: PaymentType,
        targets: &[Uuid],
        settled_at: DateTime<Utc>,
    ) -> LoanResult<AllocationPlan> {
        let outstanding = scope
            .find_schedule(contract.id, Some(&ScheduleStatus::OUTSTANDING))
            .await?;
        let plan = AllocationEngine::allocate(
            &AllocationRequest {
                amount,
                payment_type,
                targets,
                settled_at,
            },
            &outstanding,
        )?;
        Ok(plan)
    }

    /// Persist a FAILED repayment in a fresh scope after the original one was
    /// rolled back.
    async fn record_failure(&self, mut repayment: Repayment, reason: &str) -> LoanResult<()> {
        let mut scope = self.coordinator.begin(repayment.contract_id).await?;
        let contract = load_contract(&mut *scope, repayment.contract_id).await?;
        let now = Utc::now();
        repayment.status = RepaymentStatus::Failed;
        repayment.failure_reason = Some(reason.to_string());
        repayment.updated_at = now;
        repayment.completed_at = Some(now);
        scope.insert_repayment(&repayment).await?;
        scope
            .enqueue_event(&LifecycleEvent::repayment(
                EventKind::RepaymentFailed,
                &repayment,
                &contract,
            ))
            .await?;
        scope.commit().await?;

        warn!(
            repayment_id = %repayment.id,
            reference = %repayment.reference,
            reason = %reason,
            "Repayment failed"
        );
        Ok(())
    }
}

fn ensure_repayable(contract: &Contract) -> LoanResult<()> {
    if contract.status.allows_repayment() {
        Ok(())
    } else {
        Err(LoanError::StateConflict {
            entity: "contract",
            id: contract.id.to_string(),
            action: "repay",
            current: contract.status.to_string(),
        })
    }
}

fn collection_request(repayment: &Repayment) -> GatewayRequest {
    GatewayRequest {
        reference: repayment.reference.clone(),
        amount: repayment.amount,
        currency: repayment.currency.clone(),
        direction: PaymentDirection::Collection,
        destination: repayment.destination.clone(),
        narration: Some(format!("Loan repayment {}", repayment.reference)),
    }
}

/// What the channel actually collected, capped at the requested amount.
fn settled_amount(requested: Decimal, reported: Option<Decimal>) -> Decimal {
    match reported {
        Some(value) if value > Decimal::ZERO && value < requested => value,
        Some(value) if value > requested => {
            warn!(
                settled = %value,
                requested = %requested,
                "Channel settled more than requested; allocating the requested amount"
            );
            requested
        }
        _ => requested,
    }
}

/// Allocation of money the channel already collected. When the requested
/// policy no longer fits the schedule the amount is applied STANDARD over what
/// is still outstanding, and whatever is left stays unallocated.
async fn settlement_plan(
    scope: &mut TransactionScope,
    contract: &Contract,
    repayment: &Repayment,
    settled: Decimal,
    settled_at: DateTime<Utc>,
) -> LoanResult<AllocationPlan> {
    let outstanding = scope
        .find_schedule(contract.id, Some(&ScheduleStatus::OUTSTANDING))
        .await?;
    let requested = AllocationRequest {
        amount: settled,
        payment_type: repayment.payment_type,
        targets: &repayment.target_schedule_ids,
        settled_at,
    };
    let reason = match AllocationEngine::allocate(&requested, &outstanding) {
        Ok(plan) => return Ok(plan),
        Err(reason) => reason,
    };

    let fallback = AllocationRequest {
        payment_type: PaymentType::Standard,
        targets: &[],
        ..requested
    };
    let plan = AllocationEngine::allocate(&fallback, &outstanding)
        .unwrap_or_else(|_| AllocationPlan::unallocated(settled));
    warn!(
        reference = %repayment.reference,
        payment_type = %repayment.payment_type,
        settled = %settled,
        reason = %reason,
        unallocated = %plan.unallocated,
        "Requested allocation no longer applies; settling collected funds as standard"
    );
    Ok(plan)
}

/// Apply an allocation plan and the settlement to every entity in the scope.
async fn settle(
    scope: &mut TransactionScope,
    contract: &mut Contract,
    repayment: &mut Repayment,
    plan: AllocationPlan,
    settled: Decimal,
    external_transaction_id: Option<String>,
) -> LoanResult<()> {
    for entry in &plan.entries {
        scope.save_schedule_entry(entry).await?;
    }

    let status = if settled < repayment.amount {
        RepaymentStatus::Partial
    } else {
        RepaymentStatus::Completed
    };
    let allocated = plan.allocated();
    repayment.allocation = plan.lines;
    repayment.settled_amount = Some(settled);
    repayment.unallocated_amount = settled - allocated;
    repayment.external_transaction_id = external_transaction_id;
    repayment.advance(status);
    scope.update_repayment(repayment).await?;

    contract.total_paid_amount += allocated;
    contract.last_payment_date = repayment.completed_at;
    if plan.settles_contract {
        contract.status = ContractStatus::Completed;
    }
    contract.touch();
    scope.save_contract(contract).await?;

    let kind = if status == RepaymentStatus::Partial {
        EventKind::RepaymentPartial
    } else {
        EventKind::RepaymentCompleted
    };
    scope
        .enqueue_event(&LifecycleEvent::repayment(kind, repayment, contract))
        .await?;
    if plan.settles_contract {
        scope
            .enqueue_event(&LifecycleEvent::contract_fully_paid(contract))
            .await?;
        info!(contract_id = %contract.id, "Contract fully paid");
    }

    info!(
        reference = %repayment.reference,
        status = %repayment.status,
        settled = %settled,
        allocated = %allocated,
        unallocated = %repayment.unallocated_amount,
        "Repayment settled"
    );
    Ok(())
}
