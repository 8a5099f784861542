use crate::config::ChannelConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    Destination, GatewayRequest, GatewayResponse, PaymentChannel, PaymentDirection,
};
use crate::payments::utils::{verify_callback_signature, PaymentHttpClient};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

const CHANNEL: &str = "bank_transfer";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferEnvelope {
    status: String,
    transfer_id: Option<String>,
    settled_amount: Option<Decimal>,
    message: Option<String>,
}

pub struct BankTransferGateway {
    config: ChannelConfig,
    http: PaymentHttpClient,
}

impl BankTransferGateway {
    pub fn new(config: ChannelConfig, timeout: Duration) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(CHANNEL, timeout, config.max_retries)?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn into_response(request_amount: Option<Decimal>, raw: JsonValue) -> PaymentResult<GatewayResponse> {
        let envelope: TransferEnvelope =
            serde_json::from_value(raw.clone()).map_err(|e| PaymentError::ChannelError {
                channel: CHANNEL.to_string(),
                message: format!("unexpected transfer payload: {}", e),
                provider_code: None,
                retryable: false,
            })?;

        let response = match envelope.status.to_lowercase().as_str() {
            "completed" | "success" | "successful" | "settled" => {
                GatewayResponse::completed(envelope.transfer_id, raw)
            }
            "pending" | "processing" | "queued" | "awaiting_funds" => {
                GatewayResponse::pending(envelope.transfer_id, raw)
            }
            "failed" | "declined" | "rejected" | "reversed" => {
                let reason = envelope
                    .message
                    .unwrap_or_else(|| format!("transfer {}", envelope.status.to_lowercase()));
                let mut response = GatewayResponse::failed(reason, false, raw);
                response.external_transaction_id = envelope.transfer_id;
                response
            }
            other => {
                return Err(PaymentError::ChannelError {
                    channel: CHANNEL.to_string(),
                    message: format!("unknown transfer status '{}'", other),
                    provider_code: None,
                    retryable: false,
                })
            }
        };

        Ok(match (envelope.settled_amount, request_amount) {
            (Some(settled), Some(requested)) if settled != requested => {
                response.with_settled_amount(settled)
            }
            (Some(settled), None) => response.with_settled_amount(settled),
            _ => response,
        })
    }
}

#[async_trait]
impl PaymentGateway for BankTransferGateway {
    fn channel(&self) -> PaymentChannel {
        PaymentChannel::BankTransfer
    }

    async fn execute(&self, request: &GatewayRequest) -> PaymentResult<GatewayResponse> {
        let Destination::BankAccount(account) = &request.destination else {
            return Err(PaymentError::ValidationError {
                message: "bank transfer requires a bank account destination".to_string(),
                field: Some("bankInfo".to_string()),
            });
        };

        let path = match request.direction {
            PaymentDirection::Payout => "/v1/transfers",
            PaymentDirection::Collection => "/v1/collections",
        };
        let payload = serde_json::json!({
            "reference": request.reference,
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "narration": request.narration,
            "account": {
                "accountNumber": account.account_number,
                "accountName": account.account_name,
                "bankCode": account.bank_code,
            },
        });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(path),
                Some(&self.config.api_key),
                Some(&payload),
                &[("Idempotency-Key", request.reference.as_str())],
            )
            .await?;

        let response = Self::into_response(Some(request.amount), raw)?;
        info!(
            reference = %request.reference,
            status = ?response.status,
            "bank transfer submitted"
        );
        Ok(response)
    }

    async fn lookup(&self, reference: &str) -> PaymentResult<GatewayResponse> {
        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/transfers/{}", reference)),
                Some(&self.config.api_key),
                None,
                &[],
            )
            .await?;
        Self::into_response(None, raw)
    }

    fn verify_callback(&self, payload: &[u8], signature: Option<&str>) -> PaymentResult<()> {
        verify_callback_signature(
            CHANNEL,
            self.config.webhook_secret.as_deref(),
            payload,
            signature,
        )
    }
}
