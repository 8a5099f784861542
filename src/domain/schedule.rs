use super::ParseStatusError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Pending,
    Partial,
    Paid,
    Late,
    Defaulted,
}

impl ScheduleStatus {
    pub const OUTSTANDING: [ScheduleStatus; 3] = [
        ScheduleStatus::Pending,
        ScheduleStatus::Partial,
        ScheduleStatus::Late,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "PENDING",
            ScheduleStatus::Partial => "PARTIAL",
            ScheduleStatus::Paid => "PAID",
            ScheduleStatus::Late => "LATE",
            ScheduleStatus::Defaulted => "DEFAULTED",
        }
    }

    /// Entries that can still receive money.
    pub fn is_outstanding(&self) -> bool {
        Self::OUTSTANDING.contains(self)
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = ParseStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "PENDING" => Ok(ScheduleStatus::Pending),
            "PARTIAL" => Ok(ScheduleStatus::Partial),
            "PAID" => Ok(ScheduleStatus::Paid),
            "LATE" => Ok(ScheduleStatus::Late),
            "DEFAULTED" => Ok(ScheduleStatus::Defaulted),
            _ => Err(ParseStatusError::new("schedule status", value)),
        }
    }
}

/// One amortization line of a contract.
///
/// `remaining_amount` always equals `total_amount - paid_amount` and never goes
/// below zero; `principal_paid + interest_paid` always equals `paid_amount`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub installment_number: i32,
    pub due_date: NaiveDate,
    pub principal_amount: Decimal,
    pub interest_amount: Decimal,
    pub total_amount: Decimal,
    pub principal_paid: Decimal,
    pub interest_paid: Decimal,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub status: ScheduleStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

impl ScheduleEntry {
    pub fn new(
        contract_id: Uuid,
        installment_number: i32,
        due_date: NaiveDate,
        principal_amount: Decimal,
        interest_amount: Decimal,
    ) -> Self {
        let total_amount = principal_amount + interest_amount;
        Self {
            id: Uuid::new_v4(),
            contract_id,
            installment_number,
            due_date,
            principal_amount,
            interest_amount,
            total_amount,
            principal_paid: Decimal::ZERO,
            interest_paid: Decimal::ZERO,
            paid_amount: Decimal::ZERO,
            remaining_amount: total_amount,
            status: ScheduleStatus::Pending,
            paid_at: None,
        }
    }

    pub fn principal_outstanding(&self) -> Decimal {
        self.principal_amount - self.principal_paid
    }

    pub fn interest_outstanding(&self) -> Decimal {
        self.interest_amount - self.interest_paid
    }

    pub fn is_consistent(&self) -> bool {
        self.remaining_amount >= Decimal::ZERO
            && self.remaining_amount == self.total_amount - self.paid_amount
            && self.paid_amount == self.principal_paid + self.interest_paid
    }
}

/// Allocation order: earliest due date first, installment number breaks ties.
pub fn due_order(a: &ScheduleEntry, b: &ScheduleEntry) -> Ordering {
    a.due_date
        .cmp(&b.due_date)
        .then(a.installment_number.cmp(&b.installment_number))
}
