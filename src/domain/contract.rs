use super::ParseStatusError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Lending contract status as owned by the contract registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Draft,
    Active,
    Suspended,
    Restructured,
    Litigation,
    Defaulted,
    Completed,
    Canceled,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Draft => "DRAFT",
            ContractStatus::Active => "ACTIVE",
            ContractStatus::Suspended => "SUSPENDED",
            ContractStatus::Restructured => "RESTRUCTURED",
            ContractStatus::Litigation => "LITIGATION",
            ContractStatus::Defaulted => "DEFAULTED",
            ContractStatus::Completed => "COMPLETED",
            ContractStatus::Canceled => "CANCELED",
        }
    }

    /// Funds may only be released against a contract that is still being set
    /// up or already running.
    pub fn allows_disbursement(&self) -> bool {
        matches!(self, ContractStatus::Draft | ContractStatus::Active)
    }

    pub fn allows_repayment(&self) -> bool {
        matches!(self, ContractStatus::Active | ContractStatus::Restructured)
    }
}

impl std::fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractStatus {
    type Err = ParseStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "DRAFT" => Ok(ContractStatus::Draft),
            "ACTIVE" => Ok(ContractStatus::Active),
            "SUSPENDED" => Ok(ContractStatus::Suspended),
            "RESTRUCTURED" => Ok(ContractStatus::Restructured),
            "LITIGATION" => Ok(ContractStatus::Litigation),
            "DEFAULTED" => Ok(ContractStatus::Defaulted),
            "COMPLETED" => Ok(ContractStatus::Completed),
            "CANCELED" | "CANCELLED" => Ok(ContractStatus::Canceled),
            _ => Err(ParseStatusError::new("contract status", value)),
        }
    }
}

/// Contract terms and the payment summary the core keeps up to date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: Uuid,
    pub reference: String,
    pub principal_amount: Decimal,
    pub interest_rate: Decimal,
    pub term_months: i32,
    pub currency: String,
    pub status: ContractStatus,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub total_paid_amount: Decimal,
    /// Bumped by [`Contract::touch`]; stores accept a save only when the
    /// stored version is exactly one behind.
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn new(
        reference: impl Into<String>,
        principal_amount: Decimal,
        interest_rate: Decimal,
        term_months: i32,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference: reference.into(),
            principal_amount,
            interest_rate,
            term_months,
            currency: currency.into(),
            status: ContractStatus::Draft,
            last_payment_date: None,
            total_paid_amount: Decimal::ZERO,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: ContractStatus) -> Self {
        self.status = status;
        self
    }

    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// Compact view returned alongside disbursements and repayments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContractSummary {
    pub id: Uuid,
    pub status: ContractStatus,
}

impl From<&Contract> for ContractSummary {
    fn from(contract: &Contract) -> Self {
        Self {
            id: contract.id,
            status: contract.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disbursement_and_repayment_gates() {
        assert!(ContractStatus::Draft.allows_disbursement());
        assert!(ContractStatus::Active.allows_disbursement());
        assert!(!ContractStatus::Suspended.allows_disbursement());

        assert!(ContractStatus::Active.allows_repayment());
        assert!(ContractStatus::Restructured.allows_repayment());
        assert!(!ContractStatus::Draft.allows_repayment());
        assert!(!ContractStatus::Completed.allows_repayment());
    }

    #[test]
    fn status_round_trips_through_text() {
        assert_eq!("cancelled".parse::<ContractStatus>(), Ok(ContractStatus::Canceled));
        assert_eq!(ContractStatus::Restructured.to_string(), "RESTRUCTURED");
        assert!("ARCHIVED".parse::<ContractStatus>().is_err());
    }
}
