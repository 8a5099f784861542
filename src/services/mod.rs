pub mod allocation;
pub mod disbursement;
pub mod payment_orchestrator;
pub mod reconciliation;
pub mod repayment;
pub mod status_translation;
pub mod transaction_coordinator;

use crate::database::ContractRegistry;
use crate::domain::{Contract, MONEY_SCALE};
use crate::error::{LoanError, LoanResult};
use rust_decimal::Decimal;
use uuid::Uuid;

pub use allocation::{AllocationEngine, AllocationError, AllocationPlan, AllocationRequest};
pub use disbursement::DisbursementOrchestrator;
pub use payment_orchestrator::PaymentOrchestrator;
pub use reconciliation::ReconciliationService;
pub use repayment::RepaymentOrchestrator;
pub use transaction_coordinator::{TransactionCoordinator, TransactionScope};

/// Positive and expressed in minor units.
pub(crate) fn validate_amount(amount: Decimal, field: &str) -> LoanResult<()> {
    if amount <= Decimal::ZERO {
        return Err(LoanError::invalid_field(field, "amount must be greater than zero"));
    }
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(LoanError::invalid_field(
            field,
            format!("amount cannot have more than {} decimal places", MONEY_SCALE),
        ));
    }
    Ok(())
}

pub(crate) fn validate_currency(contract: &Contract, currency: Option<&str>) -> LoanResult<()> {
    match currency {
        Some(currency) if !currency.eq_ignore_ascii_case(&contract.currency) => {
            Err(LoanError::invalid_field(
                "currency",
                format!(
                    "currency {} does not match contract currency {}",
                    currency, contract.currency
                ),
            ))
        }
        _ => Ok(()),
    }
}

pub(crate) async fn load_contract<R>(registry: &mut R, id: Uuid) -> LoanResult<Contract>
where
    R: ContractRegistry + ?Sized,
{
    registry
        .get_contract(id)
        .await?
        .ok_or_else(|| LoanError::not_found("contract", id))
}

pub(crate) fn require_reason(reason: &str) -> LoanResult<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LoanError::invalid_field("reason", "reason is required"));
    }
    Ok(reason.to_string())
}
