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

const CHANNEL: &str = "mobile_money";

/// Operator answer. Operators confirm many requests asynchronously, in
/// which case `state` is PENDING and the final status arrives by callback.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperatorEnvelope {
    state: String,
    financial_transaction_id: Option<String>,
    amount: Option<Decimal>,
    reason: Option<String>,
}

pub struct MobileMoneyGateway {
    config: ChannelConfig,
    http: PaymentHttpClient,
}

impl MobileMoneyGateway {
    pub fn new(config: ChannelConfig, timeout: Duration) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(CHANNEL, timeout, config.max_retries)?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn into_response(request_amount: Option<Decimal>, raw: JsonValue) -> PaymentResult<GatewayResponse> {
        let envelope: OperatorEnvelope =
            serde_json::from_value(raw.clone()).map_err(|e| PaymentError::ChannelError {
                channel: CHANNEL.to_string(),
                message: format!("unexpected operator payload: {}", e),
                provider_code: None,
                retryable: false,
            })?;

        let response = match envelope.state.to_uppercase().as_str() {
            "SUCCESSFUL" | "SUCCESS" | "COMPLETED" => {
                GatewayResponse::completed(envelope.financial_transaction_id, raw)
            }
            "PENDING" | "ACCEPTED" | "PROCESSING" => {
                GatewayResponse::pending(envelope.financial_transaction_id, raw)
            }
            "FAILED" | "REJECTED" | "EXPIRED" => {
                let reason = envelope
                    .reason
                    .unwrap_or_else(|| format!("operator reported {}", envelope.state));
                let mut response = GatewayResponse::failed(reason, false, raw);
                response.external_transaction_id = envelope.financial_transaction_id;
                response
            }
            other => {
                return Err(PaymentError::ChannelError {
                    channel: CHANNEL.to_string(),
                    message: format!("unknown operator state '{}'", other),
                    provider_code: None,
                    retryable: false,
                })
            }
        };

        Ok(match (envelope.amount, request_amount) {
            (Some(settled), Some(requested)) if settled != requested => {
                response.with_settled_amount(settled)
            }
            (Some(settled), None) => response.with_settled_amount(settled),
            _ => response,
        })
    }
}

#[async_trait]
impl PaymentGateway for MobileMoneyGateway {
    fn channel(&self) -> PaymentChannel {
        PaymentChannel::MobileMoney
    }

    async fn execute(&self, request: &GatewayRequest) -> PaymentResult<GatewayResponse> {
        let Destination::MobileWallet(wallet) = &request.destination else {
            return Err(PaymentError::ValidationError {
                message: "mobile money requires a mobile wallet destination".to_string(),
                field: Some("mobileMoneyInfo".to_string()),
            });
        };

        let path = match request.direction {
            PaymentDirection::Payout => "/disbursement/v1/transfer",
            PaymentDirection::Collection => "/collection/v1/requesttopay",
        };
        let payload = serde_json::json!({
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "externalId": request.reference,
            "party": {
                "partyIdType": "MSISDN",
                "partyId": wallet.phone_number.trim_start_matches('+'),
            },
            "payerMessage": request.narration,
        });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(path),
                Some(&self.config.api_key),
                Some(&payload),
                &[
                    ("X-Reference-Id", request.reference.as_str()),
                    ("X-Operator", wallet.operator.as_str()),
                ],
            )
            .await?;

        let response = Self::into_response(Some(request.amount), raw)?;
        info!(
            reference = %request.reference,
            operator = %wallet.operator,
            status = ?response.status,
            "mobile money request submitted"
        );
        Ok(response)
    }

    async fn lookup(&self, reference: &str) -> PaymentResult<GatewayResponse> {
        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/requests/{}", reference)),
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
