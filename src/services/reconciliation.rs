//! Channel callbacks and status lookups.
//!
//! Both paths end in the owning orchestrator's `confirm`, which applies the
//! same state edges as the synchronous flow and is idempotent per reference.

use crate::error::{LoanError, LoanResult};
use crate::payments::types::{CallbackPayload, CallbackStatus, GatewayStatus, PaymentChannel};
use crate::payments::GatewayRouter;
use crate::services::disbursement::{DisbursementConfirmation, DisbursementOrchestrator};
use crate::services::repayment::{RepaymentConfirmation, RepaymentOrchestrator};
use crate::services::transaction_coordinator::TransactionCoordinator;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Disbursement,
    Repayment,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Disbursement => "disbursement",
            PaymentKind::Repayment => "repayment",
        }
    }
}

impl std::fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentKind {
    type Err = LoanError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "disbursement" | "disbursements" => Ok(PaymentKind::Disbursement),
            "repayment" | "repayments" => Ok(PaymentKind::Repayment),
            other => Err(LoanError::invalid_field(
                "type",
                format!("unknown payment type '{}'", other),
            )),
        }
    }
}

/// A final status reported for one reference.
#[derive(Debug, Clone)]
pub struct SettlementNotice {
    pub reference: String,
    pub status: CallbackStatus,
    pub external_transaction_id: Option<String>,
    pub settled_amount: Option<Decimal>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Reconciled {
    Disbursement(DisbursementConfirmation),
    Repayment(RepaymentConfirmation),
    /// The channel has no final status yet.
    StillPending { reference: String },
}

impl Reconciled {
    pub fn replayed(&self) -> bool {
        match self {
            Reconciled::Disbursement(c) => c.replayed,
            Reconciled::Repayment(c) => c.replayed,
            Reconciled::StillPending { .. } => false,
        }
    }
}

pub struct ReconciliationService {
    coordinator: Arc<TransactionCoordinator>,
    gateways: GatewayRouter,
    disbursements: Arc<DisbursementOrchestrator>,
    repayments: Arc<RepaymentOrchestrator>,
}

impl ReconciliationService {
    pub fn new(
        coordinator: Arc<TransactionCoordinator>,
        gateways: GatewayRouter,
        disbursements: Arc<DisbursementOrchestrator>,
        repayments: Arc<RepaymentOrchestrator>,
    ) -> Self {
        Self {
            coordinator,
            gateways,
            disbursements,
            repayments,
        }
    }

    /// Verify and apply a raw channel callback.
    pub async fn handle_callback(
        &self,
        kind: PaymentKind,
        body: &[u8],
        signature: Option<&str>,
    ) -> LoanResult<Reconciled> {
        let payload: CallbackPayload = serde_json::from_slice(body)
            .map_err(|e| LoanError::validation(format!("invalid callback payload: {}", e)))?;
        if payload.reference.trim().is_empty() {
            return Err(LoanError::invalid_field("reference", "reference is required"));
        }

        let channel = self.channel_of(kind, &payload.reference).await?;
        self.gateways
            .verify_callback(channel, body, signature)
            .map_err(|e| {
                warn!(
                    kind = %kind,
                    reference = %payload.reference,
                    channel = %channel,
                    "Callback signature rejected"
                );
                LoanError::from(e)
            })?;

        if is_interim(&payload.status) {
            info!(
                kind = %kind,
                reference = %payload.reference,
                status = %payload.status,
                "Interim callback status ignored"
            );
            return Ok(Reconciled::StillPending {
                reference: payload.reference,
            });
        }

        let status = CallbackStatus::from_str(&payload.status)?;
        self.reconcile(
            kind,
            SettlementNotice {
                reference: payload.reference,
                status,
                external_transaction_id: payload.external_transaction_id,
                settled_amount: payload.settled_amount,
                reason: payload.reason,
            },
        )
        .await
    }

    /// Apply a final status. Replaying the recorded status is a no-op.
    pub async fn reconcile(
        &self,
        kind: PaymentKind,
        notice: SettlementNotice,
    ) -> LoanResult<Reconciled> {
        info!(
            kind = %kind,
            reference = %notice.reference,
            status = %notice.status,
            "Reconciling payment"
        );
        match kind {
            PaymentKind::Disbursement => self
                .disbursements
                .confirm(
                    &notice.reference,
                    notice.status,
                    notice.external_transaction_id,
                    notice.reason,
                )
                .await
                .map(Reconciled::Disbursement),
            PaymentKind::Repayment => self
                .repayments
                .confirm(
                    &notice.reference,
                    notice.status,
                    notice.external_transaction_id,
                    notice.settled_amount,
                    notice.reason,
                )
                .await
                .map(Reconciled::Repayment),
        }
    }

    /// Ask the channel for the final status of `reference` and apply it.
    pub async fn reconcile_by_lookup(
        &self,
        kind: PaymentKind,
        reference: &str,
    ) -> LoanResult<Reconciled> {
        let channel = self.channel_of(kind, reference).await?;
        let response = self.gateways.lookup(channel, reference).await.map_err(|e| {
            let mut error = LoanError::from(e);
            if let LoanError::Gateway { reference: slot, .. } = &mut error {
                *slot = Some(reference.to_string());
            }
            error
        })?;

        let status = match response.status {
            GatewayStatus::Pending => {
                info!(reference = %reference, channel = %channel, "Channel reports payment still pending");
                return Ok(Reconciled::StillPending {
                    reference: reference.to_string(),
                });
            }
            GatewayStatus::Completed => CallbackStatus::Completed,
            GatewayStatus::Failed => CallbackStatus::Failed,
        };

        self.reconcile(
            kind,
            SettlementNotice {
                reference: reference.to_string(),
                status,
                external_transaction_id: response.external_transaction_id,
                settled_amount: response.settled_amount,
                reason: response.failure_reason,
            },
        )
        .await
    }

    async fn channel_of(&self, kind: PaymentKind, reference: &str) -> LoanResult<PaymentChannel> {
        let mut scope = self.coordinator.read().await?;
        let channel = match kind {
            PaymentKind::Disbursement => scope
                .find_disbursement_by_reference(reference)
                .await?
                .map(|d| d.channel),
            PaymentKind::Repayment => scope
                .find_repayment_by_reference(reference)
                .await?
                .map(|r| r.channel),
        };
        channel.ok_or_else(|| LoanError::not_found(kind.as_str(), reference))
    }
}

fn is_interim(status: &str) -> bool {
    matches!(
        status.trim().to_lowercase().as_str(),
        "pending" | "processing" | "queued" | "accepted"
    )
}
