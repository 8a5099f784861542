mod common;

use chrono::NaiveDate;
use common::{bank_account, wallet, Harness, ScriptedGateway};
use loan_servicing_backend::domain::{
    ContractStatus, PaymentType, RepaymentStatus, ScheduleStatus,
};
use loan_servicing_backend::error::{ErrorCode, LoanError};
use loan_servicing_backend::payments::{GatewayResponse, PaymentChannel};
use loan_servicing_backend::services::repayment::NewRepayment;
use loan_servicing_backend::services::AllocationError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;
use uuid::Uuid;

fn repayment_request(
    contract_id: Uuid,
    amount: Decimal,
    payment_type: PaymentType,
    schedule_ids: Vec<Uuid>,
) -> NewRepayment {
    NewRepayment {
        contract_id,
        amount,
        payment_type,
        schedule_ids,
        destination: wallet(),
        currency: None,
    }
}

#[tokio::test]
async fn standard_repayment_fills_the_earliest_entry_first() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;

    let outcome = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(contract.id, dec!(1500), PaymentType::Standard, vec![]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.repayment.status, RepaymentStatus::Completed);
    assert_eq!(outcome.contract.status, ContractStatus::Active);
    assert_eq!(outcome.repayment.allocated_total(), dec!(1500));

    let schedule = harness.store.schedule(contract.id).await;
    assert_eq!(schedule[0].status, ScheduleStatus::Paid);
    assert_eq!(schedule[0].principal_paid, dec!(600));
    assert_eq!(schedule[0].interest_paid, dec!(400));
    assert_eq!(schedule[1].status, ScheduleStatus::Partial);
    assert_eq!(schedule[1].paid_amount, dec!(500));
    assert_eq!(schedule[1].principal_paid, dec!(300));
    assert_eq!(schedule[1].interest_paid, dec!(200));
    assert_eq!(schedule[2].status, ScheduleStatus::Pending);
    assert!(schedule.iter().all(|e| e.is_consistent()));

    let stored = harness.store.contract(contract.id).await.unwrap();
    assert_eq!(stored.total_paid_amount, dec!(1500));
    assert!(stored.last_payment_date.is_some());

    assert_eq!(harness.event_types().await, vec!["repayment.completed"]);
}

#[tokio::test]
async fn early_payoff_below_outstanding_is_rejected_without_writes() {
    let harness = Harness::new();
    let (contract, schedule) = harness.standard_contract().await;

    let err = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(contract.id, dec!(2500), PaymentType::EarlyPayoff, vec![]),
        )
        .await
        .unwrap_err();

    match &err {
        LoanError::Allocation(AllocationError::InsufficientAmount { required, .. }) => {
            assert_eq!(*required, dec!(3000))
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.error_code(), ErrorCode::InsufficientAmount);

    assert_eq!(harness.store.schedule(contract.id).await, schedule);
    assert!(harness.store.repayments(contract.id).await.is_empty());
    assert!(harness.mobile.requests().is_empty());
    assert!(harness.store.outbox().await.is_empty());
}

#[tokio::test]
async fn early_payoff_completes_the_contract() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;

    let outcome = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(contract.id, dec!(3000), PaymentType::EarlyPayoff, vec![]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.contract.status, ContractStatus::Completed);
    assert!(harness
        .store
        .schedule(contract.id)
        .await
        .iter()
        .all(|e| e.status == ScheduleStatus::Paid && e.remaining_amount.is_zero()));

    let events = harness.event_types().await;
    assert_eq!(
        events.iter().filter(|t| *t == "contract.fully_paid").count(),
        1
    );
    assert!(events.contains(&"repayment.completed".to_string()));
}

#[tokio::test]
async fn gateway_timeout_records_failed_repayment() {
    let harness = Harness::with_gateways(
        ScriptedGateway::new(PaymentChannel::BankTransfer),
        ScriptedGateway::new(PaymentChannel::MobileMoney).with_delay(Duration::from_millis(300)),
        Duration::from_millis(50),
    );
    let (contract, schedule) = harness.standard_contract().await;

    let err = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(contract.id, dec!(1000), PaymentType::Standard, vec![]),
        )
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), ErrorCode::GatewayTimeout);
    assert_eq!(err.status_code(), 504);
    assert!(!err.is_retryable());

    let repayments = harness.store.repayments(contract.id).await;
    assert_eq!(repayments.len(), 1);
    assert_eq!(repayments[0].status, RepaymentStatus::Failed);
    assert_eq!(repayments[0].failure_reason.as_deref(), Some("TIMEOUT"));

    assert_eq!(harness.store.schedule(contract.id).await, schedule);
    assert_eq!(harness.event_types().await, vec!["repayment.failed"]);
}

#[tokio::test]
async fn declined_collection_leaves_schedule_untouched() {
    let harness = Harness::new();
    let (contract, schedule) = harness.standard_contract().await;
    harness.mobile.push(GatewayResponse::failed(
        "insufficient wallet balance",
        false,
        serde_json::json!({ "code": "E51" }),
    ));

    let err = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(contract.id, dec!(1000), PaymentType::Standard, vec![]),
        )
        .await
        .unwrap_err();

    match err {
        LoanError::Gateway {
            retryable,
            reference,
            ..
        } => {
            assert!(!retryable);
            assert!(reference.unwrap().starts_with("RPY-"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(harness.store.schedule(contract.id).await, schedule);
    let stored = harness.store.contract(contract.id).await.unwrap();
    assert_eq!(stored.total_paid_amount, Decimal::ZERO);
}

#[tokio::test]
async fn bank_transfer_waits_for_confirmation() {
    let harness = Harness::new();
    let (contract, schedule) = harness.standard_contract().await;

    let mut request = repayment_request(contract.id, dec!(1000), PaymentType::Standard, vec![]);
    request.destination = bank_account();
    let outcome = harness
        .state
        .repayments
        .create(Uuid::new_v4(), request)
        .await
        .unwrap();

    assert_eq!(outcome.repayment.status, RepaymentStatus::Pending);
    assert!(outcome.repayment.reference.starts_with("RPY-"));
    assert!(harness.bank.requests().is_empty());
    assert_eq!(harness.store.schedule(contract.id).await, schedule);
    assert_eq!(harness.event_types().await, vec!["repayment.initiated"]);
}

#[tokio::test]
async fn pending_mobile_money_collection_is_processing() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;
    harness.mobile.push(GatewayResponse::pending(
        Some("MM-123".to_string()),
        serde_json::json!({}),
    ));

    let outcome = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(contract.id, dec!(1000), PaymentType::Standard, vec![]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.repayment.status, RepaymentStatus::Processing);
    assert_eq!(
        outcome.repayment.external_transaction_id.as_deref(),
        Some("MM-123")
    );
    assert_eq!(harness.mobile.requests().len(), 1);
}

#[tokio::test]
async fn short_settlement_is_recorded_as_partial() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;
    harness.mobile.push(
        GatewayResponse::completed(Some("MM-9".to_string()), serde_json::json!({}))
            .with_settled_amount(dec!(700)),
    );

    let outcome = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(contract.id, dec!(1000), PaymentType::Standard, vec![]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.repayment.status, RepaymentStatus::Partial);
    assert_eq!(outcome.repayment.settled_amount, Some(dec!(700)));
    assert_eq!(outcome.repayment.allocated_total(), dec!(700));

    let schedule = harness.store.schedule(contract.id).await;
    assert_eq!(schedule[0].status, ScheduleStatus::Partial);
    assert_eq!(schedule[0].remaining_amount, dec!(300));
    assert_eq!(harness.event_types().await, vec!["repayment.partial"]);
}

#[tokio::test]
async fn short_settled_early_payoff_is_kept_as_standard() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;
    harness.mobile.push(
        GatewayResponse::completed(Some("MM-10".to_string()), serde_json::json!({}))
            .with_settled_amount(dec!(2000)),
    );

    let outcome = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(contract.id, dec!(3000), PaymentType::EarlyPayoff, vec![]),
        )
        .await
        .unwrap();

    assert_eq!(harness.mobile.requests().len(), 1);
    assert_eq!(outcome.repayment.status, RepaymentStatus::Partial);
    assert_eq!(outcome.repayment.settled_amount, Some(dec!(2000)));
    assert_eq!(outcome.repayment.allocated_total(), dec!(2000));
    assert_eq!(outcome.repayment.unallocated_amount, Decimal::ZERO);
    assert_eq!(outcome.contract.status, ContractStatus::Active);

    let schedule = harness.store.schedule(contract.id).await;
    assert_eq!(schedule[0].status, ScheduleStatus::Paid);
    assert_eq!(schedule[1].status, ScheduleStatus::Paid);
    assert_eq!(schedule[2].status, ScheduleStatus::Pending);

    let stored = harness.store.contract(contract.id).await.unwrap();
    assert_eq!(stored.total_paid_amount, dec!(2000));
    assert_eq!(harness.event_types().await, vec!["repayment.partial"]);
}

#[tokio::test]
async fn surplus_beyond_the_schedule_stays_on_the_repayment() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;

    let outcome = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(contract.id, dec!(3500), PaymentType::Standard, vec![]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.repayment.status, RepaymentStatus::Completed);
    assert_eq!(outcome.repayment.allocated_total(), dec!(3000));
    assert_eq!(outcome.repayment.unallocated_amount, dec!(500));
    assert_eq!(outcome.contract.status, ContractStatus::Completed);

    let stored = harness.store.contract(contract.id).await.unwrap();
    assert_eq!(stored.total_paid_amount, dec!(3000));
    assert_eq!(
        harness.event_types().await,
        vec!["repayment.completed", "contract.fully_paid"]
    );
}

#[tokio::test]
async fn partial_payment_targets_a_single_entry() {
    let harness = Harness::new();
    let (contract, schedule) = harness.standard_contract().await;

    let outcome = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(
                contract.id,
                dec!(250),
                PaymentType::Partial,
                vec![schedule[1].id],
            ),
        )
        .await
        .unwrap();
    assert_eq!(outcome.repayment.allocation.len(), 1);
    assert_eq!(outcome.repayment.allocation[0].schedule_id, schedule[1].id);

    let err = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(contract.id, dec!(250), PaymentType::Partial, vec![]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::TargetRequired);
    assert_eq!(err.status_code(), 400);

    let err = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(
                contract.id,
                dec!(1000),
                PaymentType::Partial,
                vec![schedule[2].id],
            ),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::AmountExceedsEntry);
}

#[tokio::test]
async fn advance_payment_cannot_skip_earlier_installments() {
    let harness = Harness::new();
    let (contract, schedule) = harness.standard_contract().await;

    let err = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(
                contract.id,
                dec!(1000),
                PaymentType::Advance,
                vec![schedule[1].id],
            ),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::InvalidTarget);

    let outcome = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(
                contract.id,
                dec!(2000),
                PaymentType::Advance,
                vec![schedule[0].id, schedule[1].id],
            ),
        )
        .await
        .unwrap();
    assert_eq!(outcome.repayment.allocated_total(), dec!(2000));
    let stored = harness.store.schedule(contract.id).await;
    assert_eq!(stored[0].status, ScheduleStatus::Paid);
    assert_eq!(stored[1].status, ScheduleStatus::Paid);
    assert_eq!(stored[2].status, ScheduleStatus::Pending);
}

#[tokio::test]
async fn concurrent_repayments_on_one_contract_are_serialized() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;
    let repayments = harness.state.repayments.clone();

    let first = repayments.create(
        Uuid::new_v4(),
        repayment_request(contract.id, dec!(1000), PaymentType::Standard, vec![]),
    );
    let second = repayments.create(
        Uuid::new_v4(),
        repayment_request(contract.id, dec!(1000), PaymentType::Standard, vec![]),
    );
    let (first, second) = tokio::join!(first, second);
    first.unwrap();
    second.unwrap();

    let schedule = harness.store.schedule(contract.id).await;
    assert_eq!(schedule[0].status, ScheduleStatus::Paid);
    assert_eq!(schedule[1].status, ScheduleStatus::Paid);
    assert_eq!(schedule[2].status, ScheduleStatus::Pending);

    let stored = harness.store.contract(contract.id).await.unwrap();
    assert_eq!(stored.total_paid_amount, dec!(2000));
}

#[tokio::test]
async fn repayment_requires_an_active_contract() {
    let harness = Harness::new();
    let contract = harness.draft_contract(dec!(3000)).await;

    let err = harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(contract.id, dec!(100), PaymentType::Standard, vec![]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::StateConflict);
}

#[tokio::test]
async fn invalid_amounts_are_rejected_up_front() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;

    for amount in [dec!(0), dec!(-5), dec!(10.001)] {
        let err = harness
            .state
            .repayments
            .create(
                Uuid::new_v4(),
                repayment_request(contract.id, amount, PaymentType::Standard, vec![]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ValidationError, "amount {}", amount);
    }

    let mut request = repayment_request(contract.id, dec!(100), PaymentType::Standard, vec![]);
    request.currency = Some("USD".to_string());
    let err = harness
        .state
        .repayments
        .create(Uuid::new_v4(), request)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::ValidationError);
    assert!(harness.store.repayments(contract.id).await.is_empty());
}

#[tokio::test]
async fn overdue_sweep_flags_past_due_entries_once() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;
    let as_of = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();

    let sweep = harness
        .state
        .repayments
        .flag_overdue(as_of, 100)
        .await
        .unwrap();
    assert_eq!(sweep.flagged, 2);
    assert_eq!(sweep.contracts, 1);

    let schedule = harness.store.schedule(contract.id).await;
    assert_eq!(schedule[0].status, ScheduleStatus::Late);
    assert_eq!(schedule[1].status, ScheduleStatus::Late);
    assert_eq!(schedule[2].status, ScheduleStatus::Pending);

    let again = harness
        .state
        .repayments
        .flag_overdue(as_of, 100)
        .await
        .unwrap();
    assert_eq!(again.flagged, 0);

    let overdue: Vec<String> = harness
        .event_types()
        .await
        .into_iter()
        .filter(|t| t == "payment.overdue")
        .collect();
    assert_eq!(overdue.len(), 2);
}

#[tokio::test]
async fn late_entries_stay_late_until_cleared() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;
    harness
        .state
        .repayments
        .flag_overdue(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(), 100)
        .await
        .unwrap();

    harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(contract.id, dec!(400), PaymentType::Standard, vec![]),
        )
        .await
        .unwrap();
    let schedule = harness.store.schedule(contract.id).await;
    assert_eq!(schedule[0].status, ScheduleStatus::Late);
    assert_eq!(schedule[0].remaining_amount, dec!(600));

    harness
        .state
        .repayments
        .create(
            Uuid::new_v4(),
            repayment_request(contract.id, dec!(600), PaymentType::Standard, vec![]),
        )
        .await
        .unwrap();
    let schedule = harness.store.schedule(contract.id).await;
    assert_eq!(schedule[0].status, ScheduleStatus::Paid);
    assert_eq!(schedule[1].status, ScheduleStatus::Pending);
}
