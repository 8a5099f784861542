use super::{parse_id, Actor, ApiJson, AppState, SIGNATURE_HEADER};
use crate::error::LoanError;
use crate::middleware::error::success_response;
use crate::services::payment_orchestrator::{ProcessPaymentRequest, ProcessedPayment};
use crate::services::reconciliation::{PaymentKind, Reconciled};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{json, Value as JsonValue};
use tracing::info;

/// POST /payments/process
pub async fn process_payment(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ApiJson(request): ApiJson<ProcessPaymentRequest>,
) -> Result<Response, LoanError> {
    let processed = state.payments.process(actor, request).await?;
    let data = match processed {
        ProcessedPayment::Disbursement(outcome) => json!({
            "disbursement": outcome.disbursement,
            "contract": outcome.contract,
        }),
        ProcessedPayment::Repayment(outcome) => json!({
            "repayment": outcome.repayment,
            "contract": outcome.contract,
        }),
    };
    Ok((StatusCode::OK, success_response(data)).into_response())
}

/// POST /payments/callback/{kind}
///
/// The signature covers the raw body, so the payload is parsed only after
/// it has been read as bytes.
pub async fn handle_callback(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, LoanError> {
    let kind: PaymentKind = kind.parse()?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    info!(kind = %kind, has_signature = signature.is_some(), "Received payment callback");
    let reconciled = state
        .reconciliation
        .handle_callback(kind, &body, signature)
        .await?;
    Ok((StatusCode::OK, success_response(reconciled_body(&reconciled))).into_response())
}

/// POST /payments/reconcile/{kind}/{reference}
pub async fn reconcile_payment(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path((kind, reference)): Path<(String, String)>,
) -> Result<Response, LoanError> {
    let kind: PaymentKind = kind.parse()?;
    info!(kind = %kind, reference = %reference, actor = %actor, "Manual reconciliation requested");
    let reconciled = state
        .reconciliation
        .reconcile_by_lookup(kind, &reference)
        .await?;
    Ok((StatusCode::OK, success_response(reconciled_body(&reconciled))).into_response())
}

/// GET /repayments/{id}
pub async fn get_repayment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, LoanError> {
    let id = parse_id(&id, "id")?;
    let repayment = state.repayments.get(id).await?;
    Ok(success_response(json!({ "repayment": repayment })).into_response())
}

fn reconciled_body(reconciled: &Reconciled) -> JsonValue {
    match reconciled {
        Reconciled::Disbursement(c) => json!({
            "disbursement": c.disbursement,
            "contract": c.contract,
            "replayed": c.replayed,
        }),
        Reconciled::Repayment(c) => json!({
            "repayment": c.repayment,
            "contract": c.contract,
            "replayed": c.replayed,
        }),
        Reconciled::StillPending { reference } => json!({
            "reference": reference,
            "pending": true,
        }),
    }
}
