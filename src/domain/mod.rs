//! Plain data types for lending contracts, schedules, disbursements and
//! repayments. Nothing in here talks to storage or the network.

pub mod contract;
pub mod disbursement;
pub mod repayment;
pub mod schedule;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;
use uuid::Uuid;

pub use contract::{Contract, ContractStatus};
pub use disbursement::{Disbursement, DisbursementStatus, DisbursementType};
pub use repayment::{AllocationLine, PaymentType, Repayment, RepaymentStatus};
pub use schedule::{ScheduleEntry, ScheduleStatus};

/// Number of decimal places kept for every monetary amount.
pub const MONEY_SCALE: u32 = 2;

/// Round a monetary amount to minor units.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Build a human-readable unique reference such as `RPY-20260214-3F9A1C07B2`.
pub fn generate_reference(prefix: &str, at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{}-{}-{}", prefix, at.format("%Y%m%d"), &suffix[..10])
}

/// Raised when a stored or transmitted status string is not part of a vocabulary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseStatusError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
