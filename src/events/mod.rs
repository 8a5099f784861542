//! Lifecycle events and the bus they are published to.
//!
//! Events are first written to the outbox inside the unit of work that
//! produced them; the outbox publisher later pushes committed rows to an
//! [`EventBus`]. Consumers deduplicate on `eventId`.

pub mod bus;
#[cfg(feature = "cache")]
pub mod redis_bus;

use crate::domain::{Contract, Disbursement, Repayment, ScheduleEntry};
use crate::services::status_translation::{CreditRequests, FinancingRequests, PartnerVocabulary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

pub use bus::{EventBus, EventBusError, InMemoryEventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DisbursementInitiated,
    DisbursementCompleted,
    DisbursementFailed,
    RepaymentInitiated,
    RepaymentCompleted,
    RepaymentFailed,
    RepaymentPartial,
    ContractFullyPaid,
    PaymentOverdue,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DisbursementInitiated => "disbursement.initiated",
            EventKind::DisbursementCompleted => "disbursement.completed",
            EventKind::DisbursementFailed => "disbursement.failed",
            EventKind::RepaymentInitiated => "repayment.initiated",
            EventKind::RepaymentCompleted => "repayment.completed",
            EventKind::RepaymentFailed => "repayment.failed",
            EventKind::RepaymentPartial => "repayment.partial",
            EventKind::ContractFullyPaid => "contract.fully_paid",
            EventKind::PaymentOverdue => "payment.overdue",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = crate::domain::ParseStatusError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "disbursement.initiated" => Ok(EventKind::DisbursementInitiated),
            "disbursement.completed" => Ok(EventKind::DisbursementCompleted),
            "disbursement.failed" => Ok(EventKind::DisbursementFailed),
            "repayment.initiated" => Ok(EventKind::RepaymentInitiated),
            "repayment.completed" => Ok(EventKind::RepaymentCompleted),
            "repayment.failed" => Ok(EventKind::RepaymentFailed),
            "repayment.partial" => Ok(EventKind::RepaymentPartial),
            "contract.fully_paid" => Ok(EventKind::ContractFullyPaid),
            "payment.overdue" => Ok(EventKind::PaymentOverdue),
            _ => Err(crate::domain::ParseStatusError::new("event type", value)),
        }
    }
}

/// `{entityId}:{eventType}:{version}`
pub fn idempotency_key(entity_id: Uuid, kind: EventKind, version: i64) -> String {
    format!("{}:{}:{}", entity_id, kind.as_str(), version)
}

/// Wire envelope of every outbound event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub event_id: String,
    pub event_type: String,
    pub entity_id: Uuid,
    pub version: i64,
    pub occurred_at: DateTime<Utc>,
    pub data: JsonValue,
}

impl LifecycleEvent {
    pub fn new(kind: EventKind, entity_id: Uuid, version: i64, data: JsonValue) -> Self {
        Self {
            event_id: idempotency_key(entity_id, kind, version),
            event_type: kind.as_str().to_string(),
            entity_id,
            version,
            occurred_at: Utc::now(),
            data,
        }
    }

    pub fn topic(&self) -> &str {
        &self.event_type
    }

    pub fn kind(&self) -> Option<EventKind> {
        self.event_type.parse().ok()
    }

    pub fn disbursement(kind: EventKind, disbursement: &Disbursement) -> Self {
        Self::new(
            kind,
            disbursement.id,
            disbursement.version,
            serde_json::json!({
                "reference": disbursement.reference,
                "contractId": disbursement.contract_id,
                "amount": disbursement.amount,
                "currency": disbursement.currency,
                "status": disbursement.status,
                "disbursementType": disbursement.disbursement_type,
                "channel": disbursement.channel,
                "planId": disbursement.plan_id,
                "externalTransactionId": disbursement.external_transaction_id,
                "failureReason": disbursement.failure_reason,
                "partnerStatus": FinancingRequests::to_partner(disbursement.status),
            }),
        )
    }

    pub fn repayment(kind: EventKind, repayment: &Repayment, contract: &Contract) -> Self {
        Self::new(
            kind,
            repayment.id,
            repayment.version,
            serde_json::json!({
                "reference": repayment.reference,
                "contractId": repayment.contract_id,
                "amount": repayment.amount,
                "settledAmount": repayment.settled_amount,
                "unallocatedAmount": repayment.unallocated_amount,
                "currency": repayment.currency,
                "status": repayment.status,
                "paymentType": repayment.payment_type,
                "channel": repayment.channel,
                "allocation": repayment.allocation,
                "externalTransactionId": repayment.external_transaction_id,
                "failureReason": repayment.failure_reason,
                "contractStatus": contract.status,
                "partnerStatus": CreditRequests::to_partner(contract.status),
            }),
        )
    }

    pub fn contract_fully_paid(contract: &Contract) -> Self {
        Self::new(
            EventKind::ContractFullyPaid,
            contract.id,
            contract.version,
            serde_json::json!({
                "reference": contract.reference,
                "principalAmount": contract.principal_amount,
                "totalPaidAmount": contract.total_paid_amount,
                "lastPaymentDate": contract.last_payment_date,
                "status": contract.status,
                "partnerStatus": CreditRequests::to_partner(contract.status),
            }),
        )
    }

    /// Overdue notices are keyed on the entry with a fixed version, so the
    /// sweep emits at most one per installment.
    pub fn payment_overdue(entry: &ScheduleEntry, contract: &Contract) -> Self {
        Self::new(
            EventKind::PaymentOverdue,
            entry.id,
            1,
            serde_json::json!({
                "contractId": entry.contract_id,
                "installmentNumber": entry.installment_number,
                "dueDate": entry.due_date,
                "remainingAmount": entry.remaining_amount,
                "currency": contract.currency,
                "partnerStatus": CreditRequests::to_partner(contract.status),
            }),
        )
    }
}

/// Outbox row: an event plus its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub sequence: i64,
    pub event: LifecycleEvent,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_is_entity_type_version() {
        let id = Uuid::parse_str("6f1c1f8e-5d3e-4a43-9a54-0c1b8b3c9d10").unwrap();
        let event = LifecycleEvent::new(EventKind::RepaymentCompleted, id, 3, serde_json::json!({}));
        assert_eq!(
            event.event_id,
            "6f1c1f8e-5d3e-4a43-9a54-0c1b8b3c9d10:repayment.completed:3"
        );
        assert_eq!(event.topic(), "repayment.completed");
        assert_eq!(event.kind(), Some(EventKind::RepaymentCompleted));
    }

    #[test]
    fn envelope_uses_camel_case() {
        let event = LifecycleEvent::new(
            EventKind::PaymentOverdue,
            Uuid::new_v4(),
            1,
            serde_json::json!({ "installmentNumber": 2 }),
        );
        let json = serde_json::to_value(&event).unwrap();
        for key in ["eventId", "eventType", "entityId", "version", "occurredAt", "data"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
    }
}
