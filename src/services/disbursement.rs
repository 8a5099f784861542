//! Fund release workflow.
//!
//! DRAFT → PENDING → APPROVED → (PROCESSING →) COMPLETED | FAILED, with
//! PENDING → REJECTED and DRAFT/PENDING/APPROVED → CANCELED. Every transition
//! runs inside a contract-locked scope and bumps the disbursement version.

use crate::domain::contract::ContractSummary;
use crate::domain::{
    generate_reference, Contract, ContractStatus, Disbursement, DisbursementStatus,
    DisbursementType,
};
use crate::error::{LoanError, LoanResult};
use crate::events::{EventKind, LifecycleEvent};
use crate::payments::types::{
    CallbackStatus, Destination, GatewayRequest, GatewayStatus, PaymentDirection, TIMEOUT_REASON,
};
use crate::payments::GatewayRouter;
use crate::services::transaction_coordinator::{TransactionCoordinator, TransactionScope};
use crate::services::{load_contract, require_reason, validate_amount, validate_currency};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewDisbursement {
    pub contract_id: Uuid,
    pub amount: Decimal,
    pub disbursement_type: DisbursementType,
    pub destination: Destination,
    pub currency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewInstallmentPlan {
    pub contract_id: Uuid,
    pub installments: Vec<Decimal>,
    pub destination: Destination,
    pub currency: Option<String>,
}

/// A disbursement together with the contract it now belongs to.
#[derive(Debug, Clone)]
pub struct DisbursementOutcome {
    pub disbursement: Disbursement,
    pub contract: ContractSummary,
}

/// Result of applying a final channel status to a disbursement.
#[derive(Debug, Clone)]
pub struct DisbursementConfirmation {
    pub disbursement: Disbursement,
    pub contract: ContractSummary,
    /// The status was already recorded; nothing changed.
    pub replayed: bool,
}

pub struct DisbursementOrchestrator {
    coordinator: Arc<TransactionCoordinator>,
    gateways: GatewayRouter,
}

impl DisbursementOrchestrator {
    pub fn new(coordinator: Arc<TransactionCoordinator>, gateways: GatewayRouter) -> Self {
        Self {
            coordinator,
            gateways,
        }
    }

    pub async fn create(&self, actor: Uuid, request: NewDisbursement) -> LoanResult<Disbursement> {
        validate_amount(request.amount, "amount")?;
        request.destination.validate()?;
        if request.disbursement_type == DisbursementType::Installment {
            return Err(LoanError::invalid_field(
                "disbursementType",
                "installment disbursements are created through an installment plan",
            ));
        }

        let mut scope = self.coordinator.begin(request.contract_id).await?;
        let contract = load_contract(&mut *scope, request.contract_id).await?;
        ensure_disbursable(&contract)?;
        validate_currency(&contract, request.currency.as_deref())?;

        let live = live_disbursed_total(&mut scope, contract.id).await?;
        check_amount_rule(&contract, request.disbursement_type, request.amount, live)?;

        let disbursement = self.new_record(
            actor,
            &contract,
            request.amount,
            request.disbursement_type,
            request.destination,
            None,
            None,
        );
        scope.insert_disbursement(&disbursement).await?;
        scope
            .enqueue_event(&LifecycleEvent::disbursement(
                EventKind::DisbursementInitiated,
                &disbursement,
            ))
            .await?;
        scope.commit().await?;

        info!(
            disbursement_id = %disbursement.id,
            contract_id = %contract.id,
            reference = %disbursement.reference,
            amount = %disbursement.amount,
            disbursement_type = disbursement.disbursement_type.as_str(),
            "Disbursement created"
        );
        Ok(disbursement)
    }

    /// Create every installment of a plan at once. The amounts must add up to
    /// the contract principal exactly; nothing is written otherwise.
    pub async fn create_installment_plan(
        &self,
        actor: Uuid,
        request: NewInstallmentPlan,
    ) -> LoanResult<Vec<Disbursement>> {
        if request.installments.is_empty() {
            return Err(LoanError::invalid_field(
                "installments",
                "an installment plan needs at least one installment",
            ));
        }
        for (index, amount) in request.installments.iter().enumerate() {
            validate_amount(*amount, &format!("installments[{}]", index))?;
        }
        request.destination.validate()?;

        let mut scope = self.coordinator.begin(request.contract_id).await?;
        let contract = load_contract(&mut *scope, request.contract_id).await?;
        ensure_disbursable(&contract)?;
        validate_currency(&contract, request.currency.as_deref())?;

        let total: Decimal = request.installments.iter().copied().sum();
        if total != contract.principal_amount {
            return Err(LoanError::invalid_field(
                "installments",
                format!(
                    "installments sum to {} but the contract principal is {}",
                    total, contract.principal_amount
                ),
            ));
        }
        let live = live_disbursed_total(&mut scope, contract.id).await?;
        if live > Decimal::ZERO {
            return Err(LoanError::invalid_field(
                "installments",
                format!("{} of the principal is already being disbursed", live),
            ));
        }

        let plan_id = Uuid::new_v4();
        let mut created = Vec::with_capacity(request.installments.len());
        for (index, amount) in request.installments.iter().enumerate() {
            let disbursement = self.new_record(
                actor,
                &contract,
                *amount,
                DisbursementType::Installment,
                request.destination.clone(),
                Some(plan_id),
                Some(index as i32 + 1),
            );
            scope.insert_disbursement(&disbursement).await?;
            scope
                .enqueue_event(&LifecycleEvent::disbursement(
                    EventKind::DisbursementInitiated,
                    &disbursement,
                ))
                .await?;
            created.push(disbursement);
        }
        scope.commit().await?;

        info!(
            plan_id = %plan_id,
            contract_id = %contract.id,
            installments = created.len(),
            "Installment plan created"
        );
        Ok(created)
    }

    pub async fn submit(&self, actor: Uuid, id: Uuid) -> LoanResult<Disbursement> {
        let (mut scope, mut disbursement) = self.load_locked(id).await?;
        disbursement.transition(DisbursementStatus::Pending, "submit")?;
        scope.update_disbursement(&disbursement).await?;
        scope.commit().await?;

        info!(disbursement_id = %id, actor = %actor, "Disbursement submitted for approval");
        Ok(disbursement)
    }

    pub async fn approve(
        &self,
        actor: Uuid,
        id: Uuid,
        prerequisites_verified: bool,
    ) -> LoanResult<Disbursement> {
        let (mut scope, mut disbursement) = self.load_locked(id).await?;
        disbursement.transition(DisbursementStatus::Approved, "approve")?;
        disbursement.approved_by = Some(actor);
        disbursement.approved_at = Some(disbursement.updated_at);
        disbursement.prerequisites_verified = prerequisites_verified;
        scope.update_disbursement(&disbursement).await?;
        scope.commit().await?;

        info!(
            disbursement_id = %id,
            approved_by = %actor,
            prerequisites_verified,
            "Disbursement approved"
        );
        Ok(disbursement)
    }

    pub async fn reject(&self, actor: Uuid, id: Uuid, reason: &str) -> LoanResult<Disbursement> {
        let reason = require_reason(reason)?;
        let (mut scope, mut disbursement) = self.load_locked(id).await?;
        disbursement.transition(DisbursementStatus::Rejected, "reject")?;
        disbursement.rejection_reason = Some(reason);
        scope.update_disbursement(&disbursement).await?;
        scope.commit().await?;

        info!(disbursement_id = %id, actor = %actor, "Disbursement rejected");
        Ok(disbursement)
    }

    pub async fn cancel(&self, actor: Uuid, id: Uuid, reason: &str) -> LoanResult<Disbursement> {
        let reason = require_reason(reason)?;
        let (mut scope, mut disbursement) = self.load_locked(id).await?;
        disbursement.transition(DisbursementStatus::Canceled, "cancel")?;
        disbursement.cancellation_reason = Some(reason);
        scope.update_disbursement(&disbursement).await?;
        scope.commit().await?;

        info!(disbursement_id = %id, actor = %actor, "Disbursement canceled");
        Ok(disbursement)
    }

    /// Release the funds of an approved disbursement through its channel.
    ///
    /// A failed channel call leaves the contract untouched: the scope is
    /// rolled back and a fresh one records the failure.
    pub async fn execute(&self, actor: Uuid, id: Uuid) -> LoanResult<DisbursementOutcome> {
        let (mut scope, mut disbursement) = self.load_locked(id).await?;
        if disbursement.status != DisbursementStatus::Approved {
            return Err(LoanError::StateConflict {
                entity: "disbursement",
                id: id.to_string(),
                action: "execute",
                current: disbursement.status.to_string(),
            });
        }
        let mut contract = load_contract(&mut *scope, disbursement.contract_id).await?;
        ensure_disbursable(&contract)?;

        let request = GatewayRequest {
            reference: disbursement.reference.clone(),
            amount: disbursement.amount,
            currency: disbursement.currency.clone(),
            direction: PaymentDirection::Payout,
            destination: disbursement.destination.clone(),
            narration: Some(format!("Loan disbursement {}", contract.reference)),
        };
        info!(
            disbursement_id = %id,
            reference = %disbursement.reference,
            channel = %disbursement.channel,
            actor = %actor,
            "Executing disbursement"
        );
        let response = self.gateways.execute(&request).await;

        match response.status {
            GatewayStatus::Completed => {
                disbursement.external_transaction_id = response.external_transaction_id;
                disbursement.transition(DisbursementStatus::Completed, "execute")?;
                disbursement.completed_at = Some(disbursement.updated_at);
                activate_contract(&mut scope, &mut contract).await?;
                scope.update_disbursement(&disbursement).await?;
                scope
                    .enqueue_event(&LifecycleEvent::disbursement(
                        EventKind::DisbursementCompleted,
                        &disbursement,
                    ))
                    .await?;
                scope.commit().await?;

                info!(
                    disbursement_id = %id,
                    contract_status = %contract.status,
                    "Disbursement completed"
                );
            }
            GatewayStatus::Pending => {
                disbursement.external_transaction_id = response.external_transaction_id;
                disbursement.transition(DisbursementStatus::Processing, "execute")?;
                scope.update_disbursement(&disbursement).await?;
                scope.commit().await?;

                info!(disbursement_id = %id, "Disbursement awaiting channel confirmation");
            }
            GatewayStatus::Failed => {
                scope.rollback().await?;
                let reason = response
                    .failure_reason
                    .unwrap_or_else(|| "unknown gateway failure".to_string());
                self.record_failure(id, &reason).await?;
                return Err(LoanError::Gateway {
                    message: reason,
                    retryable: response.retryable,
                    reference: Some(disbursement.reference),
                });
            }
        }

        Ok(DisbursementOutcome {
            disbursement,
            contract: ContractSummary::from(&contract),
        })
    }

    /// Create, submit, approve and execute in one go with the caller as
    /// approver. The type is FULL when the amount equals the principal.
    pub async fn disburse_now(
        &self,
        actor: Uuid,
        contract_id: Uuid,
        amount: Decimal,
        destination: Destination,
        currency: Option<String>,
    ) -> LoanResult<DisbursementOutcome> {
        let principal = {
            let mut scope = self.coordinator.read().await?;
            load_contract(&mut *scope, contract_id).await?.principal_amount
        };
        let disbursement_type = if amount == principal {
            DisbursementType::Full
        } else {
            DisbursementType::Partial
        };

        let created = self
            .create(
                actor,
                NewDisbursement {
                    contract_id,
                    amount,
                    disbursement_type,
                    destination,
                    currency,
                },
            )
            .await?;
        self.submit(actor, created.id).await?;
        self.approve(actor, created.id, true).await?;
        self.execute(actor, created.id).await
    }

    /// Apply a final channel status. Replays of the recorded status are
    /// no-ops; a contradicting status is a reconciliation conflict, except
    /// that a timed-out disbursement may still complete.
    pub async fn confirm(
        &self,
        reference: &str,
        status: CallbackStatus,
        external_transaction_id: Option<String>,
        reason: Option<String>,
    ) -> LoanResult<DisbursementConfirmation> {
        let id = {
            let mut scope = self.coordinator.read().await?;
            scope
                .find_disbursement_by_reference(reference)
                .await?
                .ok_or_else(|| LoanError::not_found("disbursement", reference))?
                .id
        };
        let (mut scope, mut disbursement) = self.load_locked(id).await?;
        let mut contract = load_contract(&mut *scope, disbursement.contract_id).await?;

        let recorded = disbursement.status;
        match (recorded, status) {
            (DisbursementStatus::Completed, CallbackStatus::Completed)
            | (DisbursementStatus::Failed, CallbackStatus::Failed) => {
                info!(reference = %reference, status = %status, "Duplicate disbursement callback ignored");
                return Ok(DisbursementConfirmation {
                    disbursement,
                    contract: ContractSummary::from(&contract),
                    replayed: true,
                });
            }
            (DisbursementStatus::Failed, CallbackStatus::Completed)
                if disbursement.failure_reason.as_deref() != Some(TIMEOUT_REASON) =>
            {
                return Err(conflict(reference, recorded.as_str(), status));
            }
            (DisbursementStatus::Completed, CallbackStatus::Failed) => {
                return Err(conflict(reference, recorded.as_str(), status));
            }
            (DisbursementStatus::Processing, _) | (DisbursementStatus::Failed, _) => {}
            _ => {
                return Err(LoanError::StateConflict {
                    entity: "disbursement",
                    id: disbursement.id.to_string(),
                    action: "confirm",
                    current: recorded.to_string(),
                });
            }
        }

        if external_transaction_id.is_some() {
            disbursement.external_transaction_id = external_transaction_id;
        }
        match status {
            CallbackStatus::Completed => {
                if recorded == DisbursementStatus::Failed {
                    warn!(
                        reference = %reference,
                        "Timed-out disbursement completed by the channel after the fact"
                    );
                }
                disbursement.transition(DisbursementStatus::Completed, "confirm")?;
                disbursement.completed_at = Some(disbursement.updated_at);
                disbursement.failure_reason = None;
                activate_contract(&mut scope, &mut contract).await?;
                scope.update_disbursement(&disbursement).await?;
                scope
                    .enqueue_event(&LifecycleEvent::disbursement(
                        EventKind::DisbursementCompleted,
                        &disbursement,
                    ))
                    .await?;
            }
            CallbackStatus::Failed => {
                disbursement.transition(DisbursementStatus::Failed, "confirm")?;
                disbursement.failure_reason =
                    Some(reason.unwrap_or_else(|| "declined by channel".to_string()));
                disbursement.completed_at = Some(disbursement.updated_at);
                scope.update_disbursement(&disbursement).await?;
                scope
                    .enqueue_event(&LifecycleEvent::disbursement(
                        EventKind::DisbursementFailed,
                        &disbursement,
                    ))
                    .await?;
            }
        }
        scope.commit().await?;

        info!(
            reference = %reference,
            status = %disbursement.status,
            "Disbursement reconciled"
        );
        Ok(DisbursementConfirmation {
            disbursement,
            contract: ContractSummary::from(&contract),
            replayed: false,
        })
    }

    pub async fn get(&self, id: Uuid) -> LoanResult<Disbursement> {
        let mut scope = self.coordinator.read().await?;
        scope
            .get_disbursement(id)
            .await?
            .ok_or_else(|| LoanError::not_found("disbursement", id))
    }

    async fn record_failure(&self, id: Uuid, reason: &str) -> LoanResult<()> {
        let (mut scope, mut disbursement) = self.load_locked(id).await?;
        disbursement.transition(DisbursementStatus::Failed, "execute")?;
        disbursement.failure_reason = Some(reason.to_string());
        disbursement.completed_at = Some(disbursement.updated_at);
        scope.update_disbursement(&disbursement).await?;
        scope
            .enqueue_event(&LifecycleEvent::disbursement(
                EventKind::DisbursementFailed,
                &disbursement,
            ))
            .await?;
        scope.commit().await?;

        warn!(
            disbursement_id = %id,
            reference = %disbursement.reference,
            reason = %reason,
            "Disbursement failed"
        );
        Ok(())
    }

    /// Lock the owning contract, then re-read the disbursement under the lock.
    async fn load_locked(&self, id: Uuid) -> LoanResult<(TransactionScope, Disbursement)> {
        let contract_id = self.get(id).await?.contract_id;
        let mut scope = self.coordinator.begin(contract_id).await?;
        let disbursement = scope
            .get_disbursement(id)
            .await?
            .ok_or_else(|| LoanError::not_found("disbursement", id))?;
        Ok((scope, disbursement))
    }

    #[allow(clippy::too_many_arguments)]
    fn new_record(
        &self,
        actor: Uuid,
        contract: &Contract,
        amount: Decimal,
        disbursement_type: DisbursementType,
        destination: Destination,
        plan_id: Option<Uuid>,
        installment_index: Option<i32>,
    ) -> Disbursement {
        let now = Utc::now();
        Disbursement {
            id: Uuid::new_v4(),
            reference: generate_reference("DSB", now),
            contract_id: contract.id,
            amount,
            currency: contract.currency.clone(),
            status: DisbursementStatus::Draft,
            disbursement_type,
            channel: destination.channel(),
            destination,
            plan_id,
            installment_index,
            external_transaction_id: None,
            failure_reason: None,
            rejection_reason: None,
            cancellation_reason: None,
            approved_by: None,
            approved_at: None,
            prerequisites_verified: false,
            created_by: actor,
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

fn ensure_disbursable(contract: &Contract) -> LoanResult<()> {
    if contract.status.allows_disbursement() {
        Ok(())
    } else {
        Err(LoanError::StateConflict {
            entity: "contract",
            id: contract.id.to_string(),
            action: "disburse against",
            current: contract.status.to_string(),
        })
    }
}

/// FULL must match the principal; nothing may push the live total above it.
fn check_amount_rule(
    contract: &Contract,
    disbursement_type: DisbursementType,
    amount: Decimal,
    live: Decimal,
) -> LoanResult<()> {
    if disbursement_type == DisbursementType::Full && amount != contract.principal_amount {
        return Err(LoanError::invalid_field(
            "amount",
            format!(
                "a full disbursement must equal the principal of {}",
                contract.principal_amount
            ),
        ));
    }
    if live + amount > contract.principal_amount {
        return Err(LoanError::invalid_field(
            "amount",
            format!(
                "{} already disbursed or in flight; {} more would exceed the principal of {}",
                live, amount, contract.principal_amount
            ),
        ));
    }
    Ok(())
}

async fn live_disbursed_total(scope: &mut TransactionScope, contract_id: Uuid) -> LoanResult<Decimal> {
    Ok(scope
        .list_disbursements(contract_id)
        .await?
        .iter()
        .filter(|d| d.status.counts_toward_principal())
        .map(|d| d.amount)
        .sum())
}

/// The first released funds switch a DRAFT contract to ACTIVE.
async fn activate_contract(scope: &mut TransactionScope, contract: &mut Contract) -> LoanResult<()> {
    if contract.status == ContractStatus::Draft {
        contract.status = ContractStatus::Active;
        contract.touch();
        scope.save_contract(contract).await?;
        info!(contract_id = %contract.id, "Contract activated by first disbursement");
    }
    Ok(())
}

fn conflict(reference: &str, recorded: &str, received: CallbackStatus) -> LoanError {
    LoanError::ReconciliationConflict {
        reference: reference.to_string(),
        recorded: recorded.to_string(),
        received: received.to_string(),
    }
}
