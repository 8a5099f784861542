//! HTTP surface.
//!
//! Handlers stay thin: extract, call the owning service, wrap the result in
//! the `{ "success": true, "data": ... }` envelope. Errors render through
//! `IntoResponse for LoanError`.

pub mod disbursements;
pub mod payments;

use crate::error::LoanError;
use crate::events::EventBus;
use crate::health::{HealthChecker, HealthStatus};
use crate::middleware::logging::{make_request_span, request_logging_middleware, UuidRequestId};
use crate::payments::GatewayRouter;
use crate::services::{
    DisbursementOrchestrator, PaymentOrchestrator, ReconciliationService, RepaymentOrchestrator,
    TransactionCoordinator,
};
use axum::{
    body::Body,
    extract::{FromRequest, FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub const ACTOR_HEADER: &str = "x-actor-id";
pub const SIGNATURE_HEADER: &str = "x-callback-signature";

/// Application context shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentOrchestrator>,
    pub disbursements: Arc<DisbursementOrchestrator>,
    pub repayments: Arc<RepaymentOrchestrator>,
    pub reconciliation: Arc<ReconciliationService>,
    pub health: HealthChecker,
}

impl AppState {
    pub fn new(
        coordinator: Arc<TransactionCoordinator>,
        gateways: GatewayRouter,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        let disbursements = Arc::new(DisbursementOrchestrator::new(
            coordinator.clone(),
            gateways.clone(),
        ));
        let repayments = Arc::new(RepaymentOrchestrator::new(
            coordinator.clone(),
            gateways.clone(),
        ));
        let reconciliation = Arc::new(ReconciliationService::new(
            coordinator.clone(),
            gateways,
            disbursements.clone(),
            repayments.clone(),
        ));
        let payments = Arc::new(PaymentOrchestrator::new(
            disbursements.clone(),
            repayments.clone(),
        ));

        Self {
            payments,
            disbursements,
            repayments,
            reconciliation,
            health: HealthChecker::new(coordinator, bus),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/payments/process", post(payments::process_payment))
        .route("/payments/callback/{kind}", post(payments::handle_callback))
        .route(
            "/payments/reconcile/{kind}/{reference}",
            post(payments::reconcile_payment),
        )
        .route("/repayments/{id}", get(payments::get_repayment))
        .route("/disbursements", post(disbursements::create_disbursement))
        .route(
            "/disbursements/installment-plan",
            post(disbursements::create_installment_plan),
        )
        .route("/disbursements/{id}", get(disbursements::get_disbursement))
        .route("/disbursements/{id}/submit", post(disbursements::submit))
        .route("/disbursements/{id}/approve", post(disbursements::approve))
        .route("/disbursements/{id}/reject", post(disbursements::reject))
        .route("/disbursements/{id}/cancel", post(disbursements::cancel))
        .route("/disbursements/{id}/execute", post(disbursements::execute))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<Body>))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let status = state.health.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// Authenticated caller, taken from the `x-actor-id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub Uuid);

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = LoanError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| LoanError::invalid_field(ACTOR_HEADER, "actor header is required"))?;
        Uuid::parse_str(raw.trim())
            .map(Actor)
            .map_err(|_| LoanError::invalid_field(ACTOR_HEADER, "actor id must be a UUID"))
    }
}

/// `Json` whose rejections render as validation errors.
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = LoanError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| ApiJson(value))
            .map_err(|rejection| LoanError::validation(rejection.body_text()))
    }
}

pub(crate) fn parse_id(raw: &str, field: &str) -> Result<Uuid, LoanError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| LoanError::invalid_field(field, format!("'{}' is not a valid id", raw)))
}
