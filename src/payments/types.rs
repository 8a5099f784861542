use crate::logging::mask_identifier;
use crate::payments::error::PaymentError;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::OnceLock;

/// Failure reason recorded when a channel call exceeds the configured timeout.
pub const TIMEOUT_REASON: &str = "TIMEOUT";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    BankTransfer,
    MobileMoney,
}

impl PaymentChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentChannel::BankTransfer => "bank_transfer",
            PaymentChannel::MobileMoney => "mobile_money",
        }
    }
}

impl std::fmt::Display for PaymentChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentChannel {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "bank_transfer" | "bank-transfer" | "bank" => Ok(PaymentChannel::BankTransfer),
            "mobile_money" | "mobile-money" | "momo" => Ok(PaymentChannel::MobileMoney),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported payment channel: {}", value),
                field: Some("paymentMethod".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    pub account_number: String,
    pub account_name: Option<String>,
    pub bank_code: Option<String>,
    pub bank_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MobileWallet {
    pub phone_number: String,
    pub operator: String,
}

/// Where the money goes (disbursement) or comes from (repayment).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    BankAccount(BankAccount),
    MobileWallet(MobileWallet),
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\+?[0-9]{8,15}$").expect("phone pattern is valid"))
}

impl Destination {
    pub fn channel(&self) -> PaymentChannel {
        match self {
            Destination::BankAccount(_) => PaymentChannel::BankTransfer,
            Destination::MobileWallet(_) => PaymentChannel::MobileMoney,
        }
    }

    /// Identifier safe to write to logs.
    pub fn masked(&self) -> String {
        match self {
            Destination::BankAccount(account) => mask_identifier(&account.account_number),
            Destination::MobileWallet(wallet) => mask_identifier(&wallet.phone_number),
        }
    }

    pub fn validate(&self) -> Result<(), PaymentError> {
        match self {
            Destination::BankAccount(account) => {
                if account.account_number.trim().is_empty() {
                    return Err(PaymentError::ValidationError {
                        message: "beneficiary account number is required".to_string(),
                        field: Some("bankInfo.beneficiaryAccount.accountNumber".to_string()),
                    });
                }
            }
            Destination::MobileWallet(wallet) => {
                let phone: String = wallet
                    .phone_number
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                if !phone_pattern().is_match(&phone) {
                    return Err(PaymentError::ValidationError {
                        message: format!("invalid phone number: {}", wallet.phone_number),
                        field: Some("mobileMoneyInfo.phoneNumber".to_string()),
                    });
                }
                if wallet.operator.trim().is_empty() {
                    return Err(PaymentError::ValidationError {
                        message: "mobile money operator is required".to_string(),
                        field: Some("mobileMoneyInfo.operator".to_string()),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    /// Lender pays the borrower.
    Payout,
    /// Borrower pays the lender.
    Collection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub direction: PaymentDirection,
    pub destination: Destination,
    pub narration: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub status: GatewayStatus,
    pub external_transaction_id: Option<String>,
    /// Set when the channel settled a different amount than requested.
    pub settled_amount: Option<Decimal>,
    pub failure_reason: Option<String>,
    pub retryable: bool,
    pub raw_response: JsonValue,
}

impl GatewayResponse {
    pub fn completed(external_transaction_id: Option<String>, raw_response: JsonValue) -> Self {
        Self {
            status: GatewayStatus::Completed,
            external_transaction_id,
            settled_amount: None,
            failure_reason: None,
            retryable: false,
            raw_response,
        }
    }

    pub fn pending(external_transaction_id: Option<String>, raw_response: JsonValue) -> Self {
        Self {
            status: GatewayStatus::Pending,
            external_transaction_id,
            settled_amount: None,
            failure_reason: None,
            retryable: false,
            raw_response,
        }
    }

    pub fn failed(reason: impl Into<String>, retryable: bool, raw_response: JsonValue) -> Self {
        Self {
            status: GatewayStatus::Failed,
            external_transaction_id: None,
            settled_amount: None,
            failure_reason: Some(reason.into()),
            retryable,
            raw_response,
        }
    }

    /// The remote side may still act on a timed-out call, so it is never
    /// retryable under a new reference without reconciliation.
    pub fn timeout(timeout_secs: u64) -> Self {
        Self::failed(
            TIMEOUT_REASON,
            false,
            serde_json::json!({ "error": "timeout", "timeout_secs": timeout_secs }),
        )
    }

    pub fn is_timeout(&self) -> bool {
        self.failure_reason.as_deref() == Some(TIMEOUT_REASON)
    }

    pub fn with_settled_amount(mut self, amount: Decimal) -> Self {
        self.settled_amount = Some(amount);
        self
    }
}

/// Final status reported by a channel callback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Completed,
    Failed,
}

impl CallbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackStatus::Completed => "completed",
            CallbackStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallbackStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "completed" | "success" | "successful" | "succeeded" | "paid" => {
                Ok(CallbackStatus::Completed)
            }
            "failed" | "failure" | "declined" | "rejected" | "cancelled" | "canceled" => {
                Ok(CallbackStatus::Failed)
            }
            _ => Err(PaymentError::ValidationError {
                message: format!("callback status must be final, got '{}'", value),
                field: Some("status".to_string()),
            }),
        }
    }
}

/// Body of `POST /payments/callback/{type}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub reference: String,
    pub status: String,
    pub external_transaction_id: Option<String>,
    pub settled_amount: Option<Decimal>,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_serializes_as_tagged_union() {
        let destination = Destination::MobileWallet(MobileWallet {
            phone_number: "+254712345678".to_string(),
            operator: "mpesa".to_string(),
        });
        let json = serde_json::to_value(&destination).expect("serialization should succeed");
        assert_eq!(json["kind"], "mobile_wallet");
        assert_eq!(json["phoneNumber"], "+254712345678");
        let parsed: Destination = serde_json::from_value(json).expect("deserialization should succeed");
        assert_eq!(parsed.channel(), PaymentChannel::MobileMoney);
    }

    #[test]
    fn phone_numbers_are_validated() {
        let mut wallet = MobileWallet {
            phone_number: "+225 07 12 34 56 78".to_string(),
            operator: "orange".to_string(),
        };
        assert!(Destination::MobileWallet(wallet.clone()).validate().is_ok());
        wallet.phone_number = "call-me".to_string();
        assert!(Destination::MobileWallet(wallet).validate().is_err());
    }

    #[test]
    fn callback_status_accepts_provider_spellings() {
        assert_eq!("successful".parse::<CallbackStatus>().unwrap(), CallbackStatus::Completed);
        assert_eq!("DECLINED".parse::<CallbackStatus>().unwrap(), CallbackStatus::Failed);
        assert!("pending".parse::<CallbackStatus>().is_err());
    }

    #[test]
    fn timeout_response_is_not_retryable() {
        let response = GatewayResponse::timeout(30);
        assert_eq!(response.status, GatewayStatus::Failed);
        assert!(response.is_timeout());
        assert!(!response.retryable);
    }
}
