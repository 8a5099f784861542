//! Unified payment entry point.
//!
//! `POST /payments/process` carries either a disbursement or a repayment.
//! The orchestrator validates the channel details, builds the destination and
//! hands off to the owning workflow.

use crate::domain::PaymentType;
use crate::error::{LoanError, LoanResult};
use crate::payments::types::{BankAccount, Destination, MobileWallet, PaymentChannel};
use crate::services::disbursement::{DisbursementOrchestrator, DisbursementOutcome};
use crate::services::reconciliation::PaymentKind;
use crate::services::repayment::{NewRepayment, RepaymentOrchestrator, RepaymentOutcome};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankInfo {
    pub beneficiary_account: BankAccount,
}

/// Payment processing request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPaymentRequest {
    #[serde(rename = "type")]
    pub kind: PaymentKind,
    pub contract_id: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentChannel,
    #[serde(default)]
    pub payment_type: Option<PaymentType>,
    #[serde(default)]
    pub schedule_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub bank_info: Option<BankInfo>,
    #[serde(default)]
    pub mobile_money_info: Option<MobileWallet>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl ProcessPaymentRequest {
    /// Destination matching the requested payment method.
    pub fn destination(&self) -> LoanResult<Destination> {
        resolve_destination(
            self.payment_method,
            self.bank_info.as_ref(),
            self.mobile_money_info.as_ref(),
        )
    }
}

/// Pick the channel details that match `method`; the other block is ignored.
pub fn resolve_destination(
    method: PaymentChannel,
    bank_info: Option<&BankInfo>,
    mobile_money_info: Option<&MobileWallet>,
) -> LoanResult<Destination> {
    match method {
        PaymentChannel::BankTransfer => bank_info
            .map(|info| Destination::BankAccount(info.beneficiary_account.clone()))
            .ok_or_else(|| LoanError::invalid_field("bankInfo", "bank transfer requires bankInfo")),
        PaymentChannel::MobileMoney => mobile_money_info
            .map(|info| Destination::MobileWallet(info.clone()))
            .ok_or_else(|| {
                LoanError::invalid_field("mobileMoneyInfo", "mobile money requires mobileMoneyInfo")
            }),
    }
}

#[derive(Debug, Clone)]
pub enum ProcessedPayment {
    Disbursement(DisbursementOutcome),
    Repayment(RepaymentOutcome),
}

pub struct PaymentOrchestrator {
    disbursements: Arc<DisbursementOrchestrator>,
    repayments: Arc<RepaymentOrchestrator>,
}

impl PaymentOrchestrator {
    pub fn new(
        disbursements: Arc<DisbursementOrchestrator>,
        repayments: Arc<RepaymentOrchestrator>,
    ) -> Self {
        Self {
            disbursements,
            repayments,
        }
    }

    pub async fn process(
        &self,
        actor: Uuid,
        request: ProcessPaymentRequest,
    ) -> LoanResult<ProcessedPayment> {
        let destination = request.destination()?;
        info!(
            kind = %request.kind,
            contract_id = %request.contract_id,
            amount = %request.amount,
            payment_method = %request.payment_method,
            actor = %actor,
            "Processing payment request"
        );

        match request.kind {
            PaymentKind::Disbursement => {
                if request.schedule_ids.as_ref().is_some_and(|ids| !ids.is_empty()) {
                    return Err(LoanError::invalid_field(
                        "scheduleIds",
                        "schedule entries only apply to repayments",
                    ));
                }
                self.disbursements
                    .disburse_now(
                        actor,
                        request.contract_id,
                        request.amount,
                        destination,
                        request.currency,
                    )
                    .await
                    .map(ProcessedPayment::Disbursement)
            }
            PaymentKind::Repayment => self
                .repayments
                .create(
                    actor,
                    NewRepayment {
                        contract_id: request.contract_id,
                        amount: request.amount,
                        payment_type: request.payment_type.unwrap_or_default(),
                        schedule_ids: request.schedule_ids.unwrap_or_default(),
                        destination,
                        currency: request.currency,
                    },
                )
                .await
                .map(ProcessedPayment::Repayment),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_parses_wire_format() {
        let request: ProcessPaymentRequest = serde_json::from_value(json!({
            "type": "repayment",
            "contractId": "6f1c1f8e-5d3e-4a43-9a54-0c1b8b3c9d10",
            "amount": "1500.00",
            "paymentMethod": "mobile_money",
            "paymentType": "early_payoff",
            "mobileMoneyInfo": { "phoneNumber": "+254712345678", "operator": "mpesa" }
        }))
        .unwrap();

        assert_eq!(request.kind, PaymentKind::Repayment);
        assert_eq!(request.payment_type, Some(PaymentType::EarlyPayoff));
        assert_eq!(
            request.destination().unwrap().channel(),
            PaymentChannel::MobileMoney
        );
    }

    #[test]
    fn missing_channel_details_are_a_validation_error() {
        let request: ProcessPaymentRequest = serde_json::from_value(json!({
            "type": "disbursement",
            "contractId": "6f1c1f8e-5d3e-4a43-9a54-0c1b8b3c9d10",
            "amount": 5000,
            "paymentMethod": "bank_transfer"
        }))
        .unwrap();

        match request.destination() {
            Err(LoanError::Validation { field, .. }) => {
                assert_eq!(field.as_deref(), Some("bankInfo"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
