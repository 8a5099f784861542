use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// JSON-over-HTTP client shared by the channel adapters.
///
/// Retries transport errors, 429 and 5xx answers with exponential backoff.
/// Callers send the payment reference as idempotency key, so a retry never
/// creates a second transfer on the remote side.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    channel: &'static str,
    timeout: Duration,
    max_retries: u32,
}

/// Outcome of a single HTTP exchange.
enum Attempt<T> {
    Done(T),
    Retry(PaymentError),
    Fail(PaymentError),
}

impl PaymentHttpClient {
    pub fn new(channel: &'static str, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::NetworkError {
                message: format!("failed to initialize {} HTTP client: {}", channel, e),
            })?;

        Ok(Self {
            client,
            channel,
            timeout,
            max_retries,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut attempt = 0;
        loop {
            let mut request = self
                .client
                .request(method.clone(), url)
                .timeout(self.timeout);
            if let Some(token) = bearer_token {
                request = request.bearer_auth(token);
            }
            for (name, value) in additional_headers {
                request = request.header(*name, *value);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let error = match self.exchange(request).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fail(error) => return Err(error),
                Attempt::Retry(error) if attempt >= self.max_retries => return Err(error),
                Attempt::Retry(error) => error,
            };

            attempt += 1;
            let delay = match &error {
                PaymentError::RateLimitError {
                    retry_after_seconds: Some(secs),
                    ..
                } => Duration::from_secs((*secs).min(30)),
                _ => backoff_delay(attempt),
            };
            warn!(
                channel = self.channel,
                url = %url,
                attempt,
                error = %error,
                "channel call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn exchange<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Attempt<T> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return Attempt::Retry(PaymentError::NetworkError {
                    message: format!("{} request failed: {}", self.channel, e),
                })
            }
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            return match serde_json::from_str::<T>(&text) {
                Ok(value) => Attempt::Done(value),
                Err(e) => Attempt::Fail(PaymentError::ChannelError {
                    channel: self.channel.to_string(),
                    message: format!("invalid channel JSON response: {}", e),
                    provider_code: None,
                    retryable: false,
                }),
            };
        }

        if status.as_u16() == 429 {
            return Attempt::Retry(PaymentError::RateLimitError {
                message: format!("{} rate limit exceeded", self.channel),
                retry_after_seconds: retry_after,
            });
        }

        let error = PaymentError::ChannelError {
            channel: self.channel.to_string(),
            message: format!("HTTP {}: {}", status, text),
            provider_code: Some(status.as_u16().to_string()),
            retryable: status.is_server_error(),
        };
        if status.is_server_error() {
            Attempt::Retry(error)
        } else {
            Attempt::Fail(error)
        }
    }
}

/// 1s, 2s, 4s, ... capped at 30s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs((1_u64 << attempt.saturating_sub(1).min(5)).min(30))
}

pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    type HmacSha512 = Hmac<Sha512>;
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    secure_eq(
        computed.as_bytes(),
        signature.trim().to_lowercase().as_bytes(),
    )
}

/// Shared callback check: without a configured secret every payload passes,
/// with one the signature is mandatory.
pub fn verify_callback_signature(
    channel: &str,
    webhook_secret: Option<&str>,
    payload: &[u8],
    signature: Option<&str>,
) -> PaymentResult<()> {
    let Some(secret) = webhook_secret.filter(|s| !s.is_empty()) else {
        return Ok(());
    };
    let signature = signature.ok_or_else(|| PaymentError::CallbackVerificationError {
        message: format!("missing {} callback signature", channel),
    })?;
    if verify_hmac_sha512_hex(payload, secret, signature) {
        Ok(())
    } else {
        Err(PaymentError::CallbackVerificationError {
            message: format!("invalid {} callback signature", channel),
        })
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
pub(crate) fn sign_hmac_sha512_hex(payload: &[u8], secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).expect("any key length works");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
