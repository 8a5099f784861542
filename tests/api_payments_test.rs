mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{Harness, ScriptedGateway};
use loan_servicing_backend::api::{self, ACTOR_HEADER};
use loan_servicing_backend::payments::{GatewayResponse, PaymentChannel};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

struct Reply {
    status: StatusCode,
    request_id: Option<String>,
    body: Value,
}

async fn send(app: Router, request: Request<Body>) -> Reply {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply {
        status,
        request_id,
        body,
    }
}

fn post_json(uri: &str, actor: Option<Uuid>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(actor) = actor {
        builder = builder.header(ACTOR_HEADER, actor.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn mobile_repayment(contract_id: Uuid, amount: u64, payment_type: &str) -> Value {
    json!({
        "type": "repayment",
        "contractId": contract_id,
        "amount": amount,
        "paymentMethod": "mobile_money",
        "paymentType": payment_type,
        "mobileMoneyInfo": { "phoneNumber": "+254712345678", "operator": "mpesa" },
    })
}

#[tokio::test]
async fn health_reports_every_component() {
    let harness = Harness::new();
    let reply = send(api::router(harness.state.clone()), get("/health")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "Healthy");
    assert_eq!(reply.body["checks"]["store"]["status"], "Up");
    assert_eq!(reply.body["checks"]["event_bus"]["status"], "Up");
    assert!(reply.request_id.is_some());
}

#[tokio::test]
async fn repayment_is_processed_through_the_api() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;

    let reply = send(
        api::router(harness.state.clone()),
        post_json(
            "/payments/process",
            Some(Uuid::new_v4()),
            &mobile_repayment(contract.id, 1500, "standard"),
        ),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["success"], true);
    assert_eq!(reply.body["data"]["repayment"]["status"], "COMPLETED");
    assert_eq!(reply.body["data"]["contract"]["status"], "ACTIVE");
    assert_eq!(
        reply.body["data"]["repayment"]["allocation"]
            .as_array()
            .unwrap()
            .len(),
        2
    );
    assert!(reply.body["timestamp"].is_string());
    assert!(reply.request_id.is_some());

    let id = reply.body["data"]["repayment"]["id"].as_str().unwrap();
    let fetched = send(
        api::router(harness.state.clone()),
        get(&format!("/repayments/{}", id)),
    )
    .await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.body["data"]["repayment"]["id"], id);
}

#[tokio::test]
async fn missing_actor_is_a_validation_error() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;

    let reply = send(
        api::router(harness.state.clone()),
        post_json(
            "/payments/process",
            None,
            &mobile_repayment(contract.id, 1000, "standard"),
        ),
    )
    .await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["success"], false);
    assert_eq!(reply.body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(reply.body["error"]["field"], ACTOR_HEADER);
    assert_eq!(reply.body["error"]["retryable"], false);
    assert!(harness.store.repayments(contract.id).await.is_empty());
}

#[tokio::test]
async fn malformed_body_is_a_validation_error() {
    let harness = Harness::new();

    let reply = send(
        api::router(harness.state.clone()),
        post_json(
            "/payments/process",
            Some(Uuid::new_v4()),
            &json!({ "type": "repayment", "amount": "lots" }),
        ),
    )
    .await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"]["code"], "VALIDATION_ERROR");

    let reply = send(
        api::router(harness.state.clone()),
        get("/disbursements/not-a-uuid"),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"]["field"], "id");

    let reply = send(
        api::router(harness.state.clone()),
        get(&format!("/repayments/{}", Uuid::new_v4())),
    )
    .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn allocation_policy_errors_are_unprocessable() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;

    let reply = send(
        api::router(harness.state.clone()),
        post_json(
            "/payments/process",
            Some(Uuid::new_v4()),
            &mobile_repayment(contract.id, 2500, "early_payoff"),
        ),
    )
    .await;

    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["error"]["code"], "INSUFFICIENT_AMOUNT");
    assert!(harness.mobile.requests().is_empty());
}

#[tokio::test]
async fn gateway_timeout_returns_the_reference_to_reconcile() {
    let harness = Harness::with_gateways(
        ScriptedGateway::new(PaymentChannel::BankTransfer),
        ScriptedGateway::new(PaymentChannel::MobileMoney).with_delay(Duration::from_millis(300)),
        Duration::from_millis(50),
    );
    let (contract, _) = harness.standard_contract().await;

    let reply = send(
        api::router(harness.state.clone()),
        post_json(
            "/payments/process",
            Some(Uuid::new_v4()),
            &mobile_repayment(contract.id, 1000, "standard"),
        ),
    )
    .await;

    assert_eq!(reply.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(reply.body["error"]["code"], "GATEWAY_TIMEOUT");
    let reference = reply.body["error"]["reference"].as_str().unwrap();
    assert_eq!(
        harness.store.repayments(contract.id).await[0].reference,
        reference
    );
}

#[tokio::test]
async fn immediate_disbursement_activates_the_contract() {
    let harness = Harness::new();
    let contract = harness.draft_contract(rust_decimal_macros::dec!(5000)).await;

    let reply = send(
        api::router(harness.state.clone()),
        post_json(
            "/payments/process",
            Some(Uuid::new_v4()),
            &json!({
                "type": "disbursement",
                "contractId": contract.id,
                "amount": 5000,
                "paymentMethod": "bank_transfer",
                "bankInfo": {
                    "beneficiaryAccount": {
                        "accountNumber": "0123456789",
                        "bankCode": "058",
                    }
                },
            }),
        ),
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["disbursement"]["status"], "COMPLETED");
    assert_eq!(reply.body["data"]["disbursement"]["disbursementType"], "FULL");
    assert_eq!(reply.body["data"]["contract"]["status"], "ACTIVE");
    assert_eq!(harness.bank.requests().len(), 1);
}

#[tokio::test]
async fn disbursement_workflow_endpoints() {
    let harness = Harness::new();
    let contract = harness.draft_contract(rust_decimal_macros::dec!(5000)).await;
    let actor = Uuid::new_v4();
    let app = api::router(harness.state.clone());

    let created = send(
        app.clone(),
        post_json(
            "/disbursements",
            Some(actor),
            &json!({
                "contractId": contract.id,
                "amount": 2000,
                "disbursementType": "PARTIAL",
                "paymentMethod": "mobile_money",
                "mobileMoneyInfo": { "phoneNumber": "+254712345678", "operator": "mpesa" },
            }),
        ),
    )
    .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["data"]["disbursement"]["status"], "DRAFT");
    let id = created.body["data"]["disbursement"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let submitted = send(
        app.clone(),
        post_json(&format!("/disbursements/{}/submit", id), Some(actor), &json!({})),
    )
    .await;
    assert_eq!(submitted.body["data"]["disbursement"]["status"], "PENDING");

    let rejected = send(
        app.clone(),
        post_json(
            &format!("/disbursements/{}/reject", id),
            Some(actor),
            &json!({ "reason": "" }),
        ),
    )
    .await;
    assert_eq!(rejected.status, StatusCode::BAD_REQUEST);
    assert_eq!(rejected.body["error"]["field"], "reason");

    let approved = send(
        app.clone(),
        post_json(
            &format!("/disbursements/{}/approve", id),
            Some(actor),
            &json!({ "prerequisitesVerified": true }),
        ),
    )
    .await;
    assert_eq!(approved.status, StatusCode::OK);
    assert_eq!(approved.body["data"]["disbursement"]["status"], "APPROVED");
    assert_eq!(
        approved.body["data"]["disbursement"]["prerequisitesVerified"],
        true
    );

    let executed = send(
        app.clone(),
        post_json(&format!("/disbursements/{}/execute", id), Some(actor), &json!({})),
    )
    .await;
    assert_eq!(executed.status, StatusCode::OK);
    assert_eq!(executed.body["data"]["disbursement"]["status"], "COMPLETED");
    assert_eq!(executed.body["data"]["contract"]["status"], "ACTIVE");

    let again = send(
        app.clone(),
        post_json(&format!("/disbursements/{}/execute", id), Some(actor), &json!({})),
    )
    .await;
    assert_eq!(again.status, StatusCode::CONFLICT);
    assert_eq!(again.body["error"]["code"], "STATE_CONFLICT");

    let fetched = send(app, get(&format!("/disbursements/{}", id))).await;
    assert_eq!(fetched.body["data"]["disbursement"]["status"], "COMPLETED");
}

#[tokio::test]
async fn installment_plan_endpoint_creates_every_installment() {
    let harness = Harness::new();
    let contract = harness.draft_contract(rust_decimal_macros::dec!(5000)).await;

    let reply = send(
        api::router(harness.state.clone()),
        post_json(
            "/disbursements/installment-plan",
            Some(Uuid::new_v4()),
            &json!({
                "contractId": contract.id,
                "installments": [2500, 2500],
                "paymentMethod": "mobile_money",
                "mobileMoneyInfo": { "phoneNumber": "+254712345678", "operator": "mpesa" },
            }),
        ),
    )
    .await;

    assert_eq!(reply.status, StatusCode::CREATED);
    let installments = reply.body["data"]["disbursements"].as_array().unwrap();
    assert_eq!(installments.len(), 2);
    assert_eq!(installments[1]["installmentIndex"], 2);
    assert_eq!(installments[0]["disbursementType"], "INSTALLMENT");
}

#[tokio::test]
async fn callback_endpoint_is_idempotent() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;
    harness
        .mobile
        .push(GatewayResponse::pending(None, json!({})));
    let app = api::router(harness.state.clone());

    let created = send(
        app.clone(),
        post_json(
            "/payments/process",
            Some(Uuid::new_v4()),
            &mobile_repayment(contract.id, 1000, "standard"),
        ),
    )
    .await;
    assert_eq!(created.body["data"]["repayment"]["status"], "PROCESSING");
    let reference = created.body["data"]["repayment"]["reference"]
        .as_str()
        .unwrap()
        .to_string();

    let callback = json!({
        "reference": reference,
        "status": "completed",
        "externalTransactionId": "MM-555",
    });
    let first = send(
        app.clone(),
        post_json("/payments/callback/repayment", None, &callback),
    )
    .await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["data"]["replayed"], false);
    assert_eq!(first.body["data"]["repayment"]["status"], "COMPLETED");

    let second = send(
        app.clone(),
        post_json("/payments/callback/repayment", None, &callback),
    )
    .await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.body["data"]["replayed"], true);

    let unknown = send(
        app,
        post_json("/payments/callback/refund", None, &callback),
    )
    .await;
    assert_eq!(unknown.status, StatusCode::BAD_REQUEST);

    let completed = harness
        .event_types()
        .await
        .into_iter()
        .filter(|t| t == "repayment.completed")
        .count();
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn manual_reconciliation_endpoint_reports_pending() {
    let harness = Harness::new();
    let (contract, _) = harness.standard_contract().await;
    harness
        .mobile
        .push(GatewayResponse::pending(None, json!({})));
    harness
        .mobile
        .push_lookup(GatewayResponse::pending(None, json!({})));
    let app = api::router(harness.state.clone());

    let created = send(
        app.clone(),
        post_json(
            "/payments/process",
            Some(Uuid::new_v4()),
            &mobile_repayment(contract.id, 1000, "standard"),
        ),
    )
    .await;
    let reference = created.body["data"]["repayment"]["reference"]
        .as_str()
        .unwrap()
        .to_string();

    let reply = send(
        app,
        post_json(
            &format!("/payments/reconcile/repayment/{}", reference),
            Some(Uuid::new_v4()),
            &json!({}),
        ),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["data"]["pending"], true);
    assert_eq!(reply.body["data"]["reference"], reference);
}
