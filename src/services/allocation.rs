//! Repayment allocation across an amortization schedule.
//!
//! The engine is pure: it takes the outstanding entries of a contract and
//! returns the allocation lines, the new state of every touched entry and
//! whatever could not be allocated. Nothing is persisted here.

use crate::domain::schedule::due_order;
use crate::domain::{round_money, AllocationLine, PaymentType, ScheduleEntry, ScheduleStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AllocationError {
    #[error("Repayment amount must be positive")]
    NonPositiveAmount,

    #[error("Amount {amount} does not cover the outstanding balance of {required}")]
    InsufficientAmount { amount: Decimal, required: Decimal },

    #[error("Contract has no outstanding schedule entries")]
    NoPendingSchedule,

    #[error("Schedule entry {schedule_id} cannot be targeted: {reason}")]
    InvalidTarget { schedule_id: Uuid, reason: String },

    #[error("Amount {amount} must be below the remaining {remaining} of schedule entry {schedule_id}")]
    AmountExceedsEntry {
        schedule_id: Uuid,
        amount: Decimal,
        remaining: Decimal,
    },

    #[error("Partial payments must target exactly one schedule entry")]
    TargetRequired,
}

/// What the payer asked for.
#[derive(Debug, Clone)]
pub struct AllocationRequest<'a> {
    pub amount: Decimal,
    pub payment_type: PaymentType,
    pub targets: &'a [Uuid],
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocationPlan {
    /// One line per touched entry, in due order.
    pub lines: Vec<AllocationLine>,
    /// New state of every touched entry.
    pub entries: Vec<ScheduleEntry>,
    pub unallocated: Decimal,
    /// No outstanding entry is left once the plan is applied.
    pub settles_contract: bool,
}

impl AllocationPlan {
    /// A plan that touches nothing and leaves `amount` unallocated.
    pub fn unallocated(amount: Decimal) -> Self {
        Self {
            lines: Vec::new(),
            entries: Vec::new(),
            unallocated: amount,
            settles_contract: false,
        }
    }

    pub fn allocated(&self) -> Decimal {
        self.lines.iter().map(AllocationLine::total).sum()
    }
}

pub struct AllocationEngine;

impl AllocationEngine {
    /// Allocate `request.amount` over `schedule`. Entries that are not
    /// outstanding are ignored; the rest are processed in due order.
    pub fn allocate(
        request: &AllocationRequest<'_>,
        schedule: &[ScheduleEntry],
    ) -> Result<AllocationPlan, AllocationError> {
        if request.amount <= Decimal::ZERO {
            return Err(AllocationError::NonPositiveAmount);
        }

        let mut outstanding: Vec<&ScheduleEntry> = schedule
            .iter()
            .filter(|e| e.status.is_outstanding() && e.remaining_amount > Decimal::ZERO)
            .collect();
        if outstanding.is_empty() {
            return Err(AllocationError::NoPendingSchedule);
        }
        outstanding.sort_by(|a, b| due_order(a, b));

        let targets = dedup_targets(request.targets);
        for target in &targets {
            if !outstanding.iter().any(|e| e.id == *target) {
                return Err(AllocationError::InvalidTarget {
                    schedule_id: *target,
                    reason: "not an outstanding entry of this contract".to_string(),
                });
            }
        }

        let mut builder = PlanBuilder::new(request.amount, request.settled_at);

        match request.payment_type {
            PaymentType::Standard => {
                for entry in candidates(&outstanding, &targets) {
                    if builder.leftover.is_zero() {
                        break;
                    }
                    let slice = entry.remaining_amount.min(builder.leftover);
                    builder.apply(entry, slice);
                }
            }
            PaymentType::Partial => {
                if targets.len() != 1 {
                    return Err(AllocationError::TargetRequired);
                }
                let entry = outstanding
                    .iter()
                    .find(|e| e.id == targets[0])
                    .copied()
                    .ok_or(AllocationError::TargetRequired)?;
                if request.amount >= entry.total_amount || request.amount >= entry.remaining_amount
                {
                    return Err(AllocationError::AmountExceedsEntry {
                        schedule_id: entry.id,
                        amount: request.amount,
                        remaining: entry.remaining_amount,
                    });
                }
                builder.apply(entry, request.amount);
            }
            PaymentType::Advance => {
                // Targets must be the head of the outstanding order.
                for (position, entry) in outstanding.iter().enumerate() {
                    if position < targets.len() && !targets.contains(&entry.id) {
                        let skipped_to = targets
                            .iter()
                            .find(|t| {
                                outstanding[position..]
                                    .iter()
                                    .any(|e| e.id == **t)
                            })
                            .copied()
                            .unwrap_or(entry.id);
                        return Err(AllocationError::InvalidTarget {
                            schedule_id: skipped_to,
                            reason: format!(
                                "installment {} is due earlier and still outstanding",
                                entry.installment_number
                            ),
                        });
                    }
                }
                for entry in candidates(&outstanding, &targets) {
                    if builder.leftover.is_zero() {
                        break;
                    }
                    if builder.leftover >= entry.remaining_amount {
                        builder.apply(entry, entry.remaining_amount);
                    } else {
                        let slice = builder.leftover;
                        builder.apply(entry, slice);
                        break;
                    }
                }
            }
            PaymentType::EarlyPayoff => {
                let required: Decimal = outstanding.iter().map(|e| e.remaining_amount).sum();
                if request.amount < required {
                    return Err(AllocationError::InsufficientAmount {
                        amount: request.amount,
                        required,
                    });
                }
                for entry in &outstanding {
                    builder.apply(entry, entry.remaining_amount);
                }
            }
        }

        Ok(builder.finish(&outstanding))
    }

    /// Split `slice` of one entry into principal and interest.
    ///
    /// The last slice of an entry takes exactly what is unpaid. Any other
    /// slice follows the entry's own principal:interest ratio.
    pub fn split(entry: &ScheduleEntry, slice: Decimal) -> (Decimal, Decimal) {
        let principal_left = entry.principal_outstanding();
        let interest_left = entry.interest_outstanding();

        if slice == entry.remaining_amount || entry.total_amount.is_zero() {
            return (principal_left, interest_left);
        }

        let mut principal = round_money(slice * entry.principal_amount / entry.total_amount)
            .min(principal_left)
            .max(Decimal::ZERO);
        let mut interest = slice - principal;
        if interest > interest_left {
            interest = interest_left;
            principal = slice - interest;
        }
        (principal, interest)
    }
}

fn dedup_targets(targets: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    targets.iter().copied().filter(|t| seen.insert(*t)).collect()
}

fn candidates<'a>(
    outstanding: &'a [&'a ScheduleEntry],
    targets: &'a [Uuid],
) -> impl Iterator<Item = &'a ScheduleEntry> + 'a {
    outstanding
        .iter()
        .copied()
        .filter(move |e| targets.is_empty() || targets.contains(&e.id))
}

struct PlanBuilder {
    leftover: Decimal,
    settled_at: DateTime<Utc>,
    lines: Vec<AllocationLine>,
    entries: Vec<ScheduleEntry>,
}

impl PlanBuilder {
    fn new(amount: Decimal, settled_at: DateTime<Utc>) -> Self {
        Self {
            leftover: amount,
            settled_at,
            lines: Vec::new(),
            entries: Vec::new(),
        }
    }

    fn apply(&mut self, entry: &ScheduleEntry, slice: Decimal) {
        let (principal, interest) = AllocationEngine::split(entry, slice);

        let mut updated = entry.clone();
        updated.principal_paid += principal;
        updated.interest_paid += interest;
        updated.paid_amount += slice;
        updated.remaining_amount -= slice;
        if updated.remaining_amount.is_zero() {
            updated.status = ScheduleStatus::Paid;
            updated.paid_at = Some(self.settled_at);
        } else if updated.status != ScheduleStatus::Late {
            // LATE survives partial payments until the entry is cleared.
            updated.status = ScheduleStatus::Partial;
        }

        self.lines.push(AllocationLine {
            schedule_id: entry.id,
            principal_amount: principal,
            interest_amount: interest,
            penalties_amount: Decimal::ZERO,
            fees_amount: Decimal::ZERO,
        });
        self.entries.push(updated);
        self.leftover -= slice;
    }

    fn finish(self, outstanding: &[&ScheduleEntry]) -> AllocationPlan {
        let settles_contract = outstanding.iter().all(|entry| {
            self.entries
                .iter()
                .any(|u| u.id == entry.id && u.status == ScheduleStatus::Paid)
        });

        AllocationPlan {
            lines: self.lines,
            entries: self.entries,
            unallocated: self.leftover,
            settles_contract,
        }
    }
}
