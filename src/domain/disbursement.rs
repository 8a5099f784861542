use super::ParseStatusError;
use crate::error::LoanError;
use crate::payments::types::{Destination, PaymentChannel};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisbursementStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Processing,
    Completed,
    Failed,
    Canceled,
}

impl DisbursementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisbursementStatus::Draft => "DRAFT",
            DisbursementStatus::Pending => "PENDING",
            DisbursementStatus::Approved => "APPROVED",
            DisbursementStatus::Rejected => "REJECTED",
            DisbursementStatus::Processing => "PROCESSING",
            DisbursementStatus::Completed => "COMPLETED",
            DisbursementStatus::Failed => "FAILED",
            DisbursementStatus::Canceled => "CANCELED",
        }
    }

    /// Get all valid transitions from this state
    pub fn valid_transitions(&self) -> &'static [DisbursementStatus] {
        use DisbursementStatus::*;
        match self {
            Draft => &[Pending, Canceled],
            Pending => &[Approved, Rejected, Canceled],
            Approved => &[Processing, Completed, Failed, Canceled],
            Processing => &[Completed, Failed],
            // A FAILED record left by a gateway timeout can still be confirmed
            // by a late callback.
            Failed => &[Completed],
            Rejected | Completed | Canceled => &[],
        }
    }

    pub fn can_transition_to(&self, target: DisbursementStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DisbursementStatus::Rejected
                | DisbursementStatus::Completed
                | DisbursementStatus::Failed
                | DisbursementStatus::Canceled
        )
    }

    /// Statuses whose amount still counts against the contract principal.
    pub fn counts_toward_principal(&self) -> bool {
        !matches!(
            self,
            DisbursementStatus::Rejected | DisbursementStatus::Failed | DisbursementStatus::Canceled
        )
    }
}

impl std::fmt::Display for DisbursementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisbursementStatus {
    type Err = ParseStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "DRAFT" => Ok(DisbursementStatus::Draft),
            "PENDING" => Ok(DisbursementStatus::Pending),
            "APPROVED" => Ok(DisbursementStatus::Approved),
            "REJECTED" => Ok(DisbursementStatus::Rejected),
            "PROCESSING" => Ok(DisbursementStatus::Processing),
            "COMPLETED" => Ok(DisbursementStatus::Completed),
            "FAILED" => Ok(DisbursementStatus::Failed),
            "CANCELED" | "CANCELLED" => Ok(DisbursementStatus::Canceled),
            _ => Err(ParseStatusError::new("disbursement status", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisbursementType {
    Full,
    Partial,
    Installment,
}

impl DisbursementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisbursementType::Full => "FULL",
            DisbursementType::Partial => "PARTIAL",
            DisbursementType::Installment => "INSTALLMENT",
        }
    }
}

impl FromStr for DisbursementType {
    type Err = ParseStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "FULL" => Ok(DisbursementType::Full),
            "PARTIAL" => Ok(DisbursementType::Partial),
            "INSTALLMENT" => Ok(DisbursementType::Installment),
            _ => Err(ParseStatusError::new("disbursement type", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Disbursement {
    pub id: Uuid,
    pub reference: String,
    pub contract_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: DisbursementStatus,
    pub disbursement_type: DisbursementType,
    pub channel: PaymentChannel,
    pub destination: Destination,
    pub plan_id: Option<Uuid>,
    pub installment_index: Option<i32>,
    pub external_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub prerequisites_verified: bool,
    pub created_by: Uuid,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Disbursement {
    /// Move to `target`, bumping the version; fails with a state conflict when
    /// the edge is not part of the workflow.
    pub fn transition(
        &mut self,
        target: DisbursementStatus,
        action: &'static str,
    ) -> Result<(), LoanError> {
        if !self.status.can_transition_to(target) {
            return Err(LoanError::StateConflict {
                entity: "disbursement",
                id: self.id.to_string(),
                action,
                current: self.status.to_string(),
            });
        }
        self.status = target;
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }
}
