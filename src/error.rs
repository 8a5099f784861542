//! Unified error handling for the loan servicing core.
//!
//! Every layer has its own `thiserror` enum (`PaymentError`, `StoreError`,
//! `AllocationError`); they all funnel into [`LoanError`], which carries a
//! stable [`ErrorCode`], an HTTP status and a retryable flag.

use crate::database::error::StoreError;
use crate::domain::ParseStatusError;
use crate::payments::error::PaymentError;
use crate::payments::types::TIMEOUT_REASON;
use crate::services::allocation::AllocationError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error codes returned to clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "STATE_CONFLICT")]
    StateConflict,

    // Allocation policy
    #[serde(rename = "INSUFFICIENT_AMOUNT")]
    InsufficientAmount,
    #[serde(rename = "NO_PENDING_SCHEDULE")]
    NoPendingSchedule,
    #[serde(rename = "INVALID_TARGET")]
    InvalidTarget,
    #[serde(rename = "AMOUNT_EXCEEDS_ENTRY")]
    AmountExceedsEntry,
    #[serde(rename = "TARGET_REQUIRED")]
    TargetRequired,

    #[serde(rename = "CONCURRENCY_CONFLICT")]
    ConcurrencyConflict,
    #[serde(rename = "RECONCILIATION_CONFLICT")]
    ReconciliationConflict,

    // External (502, 504)
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "GATEWAY_TIMEOUT")]
    GatewayTimeout,

    #[serde(rename = "STORAGE_ERROR")]
    StorageError,
}

#[derive(Debug, Error)]
pub enum LoanError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Callback rejected: {message}")]
    Unauthorized { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Cannot {action} {entity} {id} in status {current}")]
    StateConflict {
        entity: &'static str,
        id: String,
        action: &'static str,
        current: String,
    },

    #[error("Gateway error: {message}")]
    Gateway {
        message: String,
        retryable: bool,
        reference: Option<String>,
    },

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("{entity} {id} was modified concurrently")]
    ConcurrencyConflict { entity: &'static str, id: String },

    #[error("Reconciliation conflict for {reference}: recorded {recorded}, received {received}")]
    ReconciliationConflict {
        reference: String,
        recorded: String,
        received: String,
    },

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl LoanError {
    pub fn validation(message: impl Into<String>) -> Self {
        LoanError::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        LoanError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LoanError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            LoanError::Validation { .. } => 400,
            LoanError::Unauthorized { .. } => 401,
            LoanError::NotFound { .. } => 404,
            LoanError::StateConflict { .. } => 409,
            LoanError::Gateway { message, .. } if message == TIMEOUT_REASON => 504,
            LoanError::Gateway { .. } => 502,
            LoanError::Allocation(err) => match err {
                AllocationError::NonPositiveAmount | AllocationError::TargetRequired => 400,
                _ => 422,
            },
            LoanError::ConcurrencyConflict { .. } => 409,
            LoanError::ReconciliationConflict { .. } => 409,
            LoanError::Storage(_) => 500,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match self {
            LoanError::Validation { .. } => ErrorCode::ValidationError,
            LoanError::Unauthorized { .. } => ErrorCode::Unauthorized,
            LoanError::NotFound { .. } => ErrorCode::NotFound,
            LoanError::StateConflict { .. } => ErrorCode::StateConflict,
            LoanError::Gateway { message, .. } if message == TIMEOUT_REASON => {
                ErrorCode::GatewayTimeout
            }
            LoanError::Gateway { .. } => ErrorCode::GatewayError,
            LoanError::Allocation(err) => match err {
                AllocationError::NonPositiveAmount => ErrorCode::ValidationError,
                AllocationError::InsufficientAmount { .. } => ErrorCode::InsufficientAmount,
                AllocationError::NoPendingSchedule => ErrorCode::NoPendingSchedule,
                AllocationError::InvalidTarget { .. } => ErrorCode::InvalidTarget,
                AllocationError::AmountExceedsEntry { .. } => ErrorCode::AmountExceedsEntry,
                AllocationError::TargetRequired => ErrorCode::TargetRequired,
            },
            LoanError::ConcurrencyConflict { .. } => ErrorCode::ConcurrencyConflict,
            LoanError::ReconciliationConflict { .. } => ErrorCode::ReconciliationConflict,
            LoanError::Storage(_) => ErrorCode::StorageError,
        }
    }

    /// Message safe to show to API clients
    pub fn user_message(&self) -> String {
        match self {
            LoanError::Gateway { retryable, .. } if *retryable => {
                "Payment channel is temporarily unavailable. Please try again".to_string()
            }
            LoanError::Gateway { message, reference, .. } if message == TIMEOUT_REASON => {
                match reference {
                    Some(reference) => format!(
                        "Payment channel did not answer in time. Reconcile reference {} before retrying",
                        reference
                    ),
                    None => "Payment channel did not answer in time".to_string(),
                }
            }
            LoanError::Storage(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LoanError::Gateway { retryable, .. } => *retryable,
            LoanError::ConcurrencyConflict { .. } => true,
            LoanError::Storage(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<StoreError> for LoanError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { entity, id, .. } => {
                LoanError::ConcurrencyConflict { entity, id }
            }
            StoreError::NotFound { entity, id } => LoanError::NotFound { entity, id },
            other => LoanError::Storage(other),
        }
    }
}

impl From<PaymentError> for LoanError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ValidationError { message, field } => {
                LoanError::Validation { message, field }
            }
            PaymentError::CallbackVerificationError { message } => {
                LoanError::Unauthorized { message }
            }
            other => LoanError::Gateway {
                retryable: other.is_retryable(),
                message: other.to_string(),
                reference: None,
            },
        }
    }
}

impl From<ParseStatusError> for LoanError {
    fn from(err: ParseStatusError) -> Self {
        LoanError::validation(err.to_string())
    }
}

/// Result type for operations that can fail with LoanError
pub type LoanResult<T> = Result<T, LoanError>;
