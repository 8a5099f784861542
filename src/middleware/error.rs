//! Error response formatting
//!
//! Every failed request renders the same JSON envelope:
//! `{ "success": false, "error": { "code", "message", "retryable" }, "timestamp" }`.

use crate::error::{ErrorCode, LoanError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Whether the client should retry the request
    pub retryable: bool,
    /// Offending request field, for validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Payment reference the client must reconcile before retrying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
    /// ISO 8601 timestamp of the error
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn from_loan_error(error: &LoanError) -> Self {
        let field = match error {
            LoanError::Validation { field, .. } => field.clone(),
            _ => None,
        };
        let reference = match error {
            LoanError::Gateway { reference, .. } => reference.clone(),
            LoanError::ReconciliationConflict { reference, .. } => Some(reference.clone()),
            _ => None,
        };

        Self {
            success: false,
            error: ErrorDetail {
                code: error.error_code(),
                message: error.user_message(),
                retryable: error.is_retryable(),
                field,
                reference,
            },
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for LoanError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = %self,
                code = ?self.error_code(),
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = %self,
                code = ?self.error_code(),
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let error_response = ErrorResponse::from_loan_error(&self);
        (status_code, Json(error_response)).into_response()
    }
}

/// Create a standardized success response
pub fn success_response<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
