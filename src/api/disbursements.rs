//! Disbursement workflow endpoints: DRAFT → PENDING_APPROVAL → APPROVED →
//! PROCESSING/COMPLETED, with reject and cancel exits.

use super::{parse_id, Actor, ApiJson, AppState};
use crate::domain::{Disbursement, DisbursementType};
use crate::error::LoanError;
use crate::middleware::error::success_response;
use crate::payments::types::{MobileWallet, PaymentChannel};
use crate::services::disbursement::{NewDisbursement, NewInstallmentPlan};
use crate::services::payment_orchestrator::{resolve_destination, BankInfo};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDisbursementRequest {
    pub contract_id: Uuid,
    pub amount: Decimal,
    pub disbursement_type: DisbursementType,
    pub payment_method: PaymentChannel,
    #[serde(default)]
    pub bank_info: Option<BankInfo>,
    #[serde(default)]
    pub mobile_money_info: Option<MobileWallet>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallmentPlanRequest {
    pub contract_id: Uuid,
    pub installments: Vec<Decimal>,
    pub payment_method: PaymentChannel,
    #[serde(default)]
    pub bank_info: Option<BankInfo>,
    #[serde(default)]
    pub mobile_money_info: Option<MobileWallet>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    #[serde(default)]
    pub prerequisites_verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

fn disbursement_body(disbursement: &Disbursement) -> serde_json::Value {
    json!({ "disbursement": disbursement })
}

/// POST /disbursements
pub async fn create_disbursement(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ApiJson(request): ApiJson<CreateDisbursementRequest>,
) -> Result<Response, LoanError> {
    let destination = resolve_destination(
        request.payment_method,
        request.bank_info.as_ref(),
        request.mobile_money_info.as_ref(),
    )?;
    let disbursement = state
        .disbursements
        .create(
            actor,
            NewDisbursement {
                contract_id: request.contract_id,
                amount: request.amount,
                disbursement_type: request.disbursement_type,
                destination,
                currency: request.currency,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, success_response(disbursement_body(&disbursement))).into_response())
}

/// POST /disbursements/installment-plan
pub async fn create_installment_plan(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ApiJson(request): ApiJson<InstallmentPlanRequest>,
) -> Result<Response, LoanError> {
    let destination = resolve_destination(
        request.payment_method,
        request.bank_info.as_ref(),
        request.mobile_money_info.as_ref(),
    )?;
    let installments = state
        .disbursements
        .create_installment_plan(
            actor,
            NewInstallmentPlan {
                contract_id: request.contract_id,
                installments: request.installments,
                destination,
                currency: request.currency,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        success_response(json!({ "disbursements": installments })),
    )
        .into_response())
}

/// GET /disbursements/{id}
pub async fn get_disbursement(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, LoanError> {
    let id = parse_id(&id, "id")?;
    let disbursement = state.disbursements.get(id).await?;
    Ok(success_response(disbursement_body(&disbursement)).into_response())
}

/// POST /disbursements/{id}/submit
pub async fn submit(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Response, LoanError> {
    let id = parse_id(&id, "id")?;
    let disbursement = state.disbursements.submit(actor, id).await?;
    Ok(success_response(disbursement_body(&disbursement)).into_response())
}

/// POST /disbursements/{id}/approve
pub async fn approve(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<ApproveRequest>,
) -> Result<Response, LoanError> {
    let id = parse_id(&id, "id")?;
    let disbursement = state
        .disbursements
        .approve(actor, id, request.prerequisites_verified)
        .await?;
    Ok(success_response(disbursement_body(&disbursement)).into_response())
}

/// POST /disbursements/{id}/reject
pub async fn reject(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<ReasonRequest>,
) -> Result<Response, LoanError> {
    let id = parse_id(&id, "id")?;
    let disbursement = state
        .disbursements
        .reject(actor, id, &request.reason)
        .await?;
    Ok(success_response(disbursement_body(&disbursement)).into_response())
}

/// POST /disbursements/{id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<ReasonRequest>,
) -> Result<Response, LoanError> {
    let id = parse_id(&id, "id")?;
    let disbursement = state
        .disbursements
        .cancel(actor, id, &request.reason)
        .await?;
    Ok(success_response(disbursement_body(&disbursement)).into_response())
}

/// POST /disbursements/{id}/execute
pub async fn execute(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> Result<Response, LoanError> {
    let id = parse_id(&id, "id")?;
    let outcome = state.disbursements.execute(actor, id).await?;
    Ok(success_response(json!({
        "disbursement": outcome.disbursement,
        "contract": outcome.contract,
    }))
    .into_response())
}
