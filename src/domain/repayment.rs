use super::ParseStatusError;
use crate::payments::types::{Destination, PaymentChannel};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    /// The channel settled less than the requested amount.
    Partial,
}

impl RepaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepaymentStatus::Pending => "PENDING",
            RepaymentStatus::Processing => "PROCESSING",
            RepaymentStatus::Completed => "COMPLETED",
            RepaymentStatus::Failed => "FAILED",
            RepaymentStatus::Partial => "PARTIAL",
        }
    }

    /// Money reached the lender and has been allocated.
    pub fn is_settled(&self) -> bool {
        matches!(self, RepaymentStatus::Completed | RepaymentStatus::Partial)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RepaymentStatus::Completed | RepaymentStatus::Partial | RepaymentStatus::Failed
        )
    }

    pub fn awaits_confirmation(&self) -> bool {
        matches!(self, RepaymentStatus::Pending | RepaymentStatus::Processing)
    }
}

impl std::fmt::Display for RepaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepaymentStatus {
    type Err = ParseStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "PENDING" => Ok(RepaymentStatus::Pending),
            "PROCESSING" => Ok(RepaymentStatus::Processing),
            "COMPLETED" => Ok(RepaymentStatus::Completed),
            "FAILED" => Ok(RepaymentStatus::Failed),
            "PARTIAL" => Ok(RepaymentStatus::Partial),
            _ => Err(ParseStatusError::new("repayment status", value)),
        }
    }
}

/// Allocation policy requested by the payer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    #[default]
    Standard,
    Partial,
    Advance,
    EarlyPayoff,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Standard => "STANDARD",
            PaymentType::Partial => "PARTIAL",
            PaymentType::Advance => "ADVANCE",
            PaymentType::EarlyPayoff => "EARLY_PAYOFF",
        }
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentType {
    type Err = ParseStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().replace('-', "_").as_str() {
            "STANDARD" => Ok(PaymentType::Standard),
            "PARTIAL" => Ok(PaymentType::Partial),
            "ADVANCE" => Ok(PaymentType::Advance),
            "EARLY_PAYOFF" => Ok(PaymentType::EarlyPayoff),
            _ => Err(ParseStatusError::new("payment type", value)),
        }
    }
}

/// Portion of a repayment applied to one schedule entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllocationLine {
    pub schedule_id: Uuid,
    pub principal_amount: Decimal,
    pub interest_amount: Decimal,
    pub penalties_amount: Decimal,
    pub fees_amount: Decimal,
}

impl AllocationLine {
    pub fn total(&self) -> Decimal {
        self.principal_amount + self.interest_amount + self.penalties_amount + self.fees_amount
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Repayment {
    pub id: Uuid,
    pub reference: String,
    pub contract_id: Uuid,
    pub amount: Decimal,
    pub settled_amount: Option<Decimal>,
    /// Settled money the schedule could not absorb.
    #[serde(default)]
    pub unallocated_amount: Decimal,
    pub currency: String,
    pub status: RepaymentStatus,
    pub payment_type: PaymentType,
    pub target_schedule_ids: Vec<Uuid>,
    pub channel: PaymentChannel,
    pub destination: Destination,
    pub allocation: Vec<AllocationLine>,
    pub external_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_by: Uuid,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Repayment {
    /// Move to `status` and bump the version. Settled and failed records get
    /// their completion timestamp.
    pub fn advance(&mut self, status: RepaymentStatus) {
        self.status = status;
        self.version += 1;
        self.updated_at = Utc::now();
        if status.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
    }

    pub fn allocated_total(&self) -> Decimal {
        self.allocation.iter().map(AllocationLine::total).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn payment_type_accepts_api_and_storage_spellings() {
        assert_eq!("early_payoff".parse::<PaymentType>(), Ok(PaymentType::EarlyPayoff));
        assert_eq!("EARLY-PAYOFF".parse::<PaymentType>(), Ok(PaymentType::EarlyPayoff));
        assert_eq!(
            serde_json::to_value(PaymentType::EarlyPayoff).unwrap(),
            serde_json::json!("early_payoff")
        );
    }

    #[test]
    fn allocation_line_total_sums_all_components() {
        let line = AllocationLine {
            schedule_id: Uuid::new_v4(),
            principal_amount: dec!(300),
            interest_amount: dec!(200),
            penalties_amount: dec!(5),
            fees_amount: dec!(1.5),
        };
        assert_eq!(line.total(), dec!(506.5));
    }

    #[test]
    fn settled_statuses() {
        assert!(RepaymentStatus::Completed.is_settled());
        assert!(RepaymentStatus::Partial.is_settled());
        assert!(!RepaymentStatus::Failed.is_settled());
        assert!(RepaymentStatus::Processing.awaits_confirmation());
    }
}
