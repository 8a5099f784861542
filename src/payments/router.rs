use crate::config::GatewayConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{BankTransferGateway, MobileMoneyGateway};
use crate::payments::types::{GatewayRequest, GatewayResponse, PaymentChannel};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Routes gateway calls to the adapter registered for a channel and bounds
/// every call with the configured timeout.
#[derive(Clone)]
pub struct GatewayRouter {
    gateways: HashMap<PaymentChannel, Arc<dyn PaymentGateway>>,
    timeout: Duration,
}

impl GatewayRouter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            gateways: HashMap::new(),
            timeout,
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.channel(), gateway);
        self
    }

    pub fn from_config(config: &GatewayConfig) -> PaymentResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut router = Self::new(timeout);
        if let Some(bank) = &config.bank_transfer {
            router = router.with_gateway(Arc::new(BankTransferGateway::new(bank.clone(), timeout)?));
        }
        if let Some(mobile) = &config.mobile_money {
            router = router.with_gateway(Arc::new(MobileMoneyGateway::new(mobile.clone(), timeout)?));
        }
        info!(
            channels = ?router.available_channels(),
            timeout_secs = config.timeout_secs,
            "payment gateways configured"
        );
        Ok(router)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn supports(&self, channel: PaymentChannel) -> bool {
        self.gateways.contains_key(&channel)
    }

    pub fn available_channels(&self) -> Vec<PaymentChannel> {
        let mut channels: Vec<PaymentChannel> = self.gateways.keys().copied().collect();
        channels.sort_by_key(|c| c.as_str());
        channels
    }

    pub fn gateway(&self, channel: PaymentChannel) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&channel)
            .cloned()
            .ok_or_else(|| PaymentError::ChannelUnavailable {
                channel: channel.to_string(),
            })
    }

    /// Execute a payment. Never returns an error: transport failures and
    /// timeouts are folded into a failed [`GatewayResponse`].
    ///
    /// The call runs on its own task, so a timeout only stops waiting; the
    /// dispatched request is left to finish and a follow-up task logs its
    /// late outcome for reconciliation.
    pub async fn execute(&self, request: &GatewayRequest) -> GatewayResponse {
        let channel = request.destination.channel();
        let gateway = match self.gateway(channel) {
            Ok(gateway) => gateway,
            Err(e) => {
                return GatewayResponse::failed(
                    e.to_string(),
                    false,
                    serde_json::json!({ "error": "channel_unavailable" }),
                )
            }
        };

        debug!(
            reference = %request.reference,
            channel = %channel,
            destination = %request.destination.masked(),
            amount = %request.amount,
            "dispatching gateway call"
        );
        let owned = request.clone();
        let mut handle = tokio::spawn(async move { gateway.execute(&owned).await });
        let reference = request.reference.clone();

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(Ok(response))) => response,
            Ok(Ok(Err(e))) => {
                warn!(
                    reference = %reference,
                    channel = %channel,
                    error = %e,
                    retryable = e.is_retryable(),
                    "gateway call failed"
                );
                GatewayResponse::failed(
                    e.to_string(),
                    e.is_retryable(),
                    serde_json::json!({ "error": e.to_string() }),
                )
            }
            Ok(Err(join_error)) => {
                error!(reference = %reference, error = %join_error, "gateway task aborted");
                GatewayResponse::failed(
                    format!("gateway task aborted: {}", join_error),
                    false,
                    serde_json::json!({ "error": "task_aborted" }),
                )
            }
            Err(_) => {
                warn!(
                    reference = %reference,
                    channel = %channel,
                    timeout_secs = self.timeout.as_secs(),
                    "gateway call timed out; reconciliation required before retry"
                );
                watch_late_outcome(handle, reference, channel);
                GatewayResponse::timeout(self.timeout.as_secs())
            }
        }
    }

    pub async fn lookup(
        &self,
        channel: PaymentChannel,
        reference: &str,
    ) -> PaymentResult<GatewayResponse> {
        let gateway = self.gateway(channel)?;
        match tokio::time::timeout(self.timeout, gateway.lookup(reference)).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::NetworkError {
                message: format!("{} lookup timed out for {}", channel, reference),
            }),
        }
    }

    pub fn verify_callback(
        &self,
        channel: PaymentChannel,
        payload: &[u8],
        signature: Option<&str>,
    ) -> PaymentResult<()> {
        self.gateway(channel)?.verify_callback(payload, signature)
    }
}

/// Keep awaiting a call the caller stopped waiting for and log its final
/// outcome against the reference, so reconciliation has something to match.
fn watch_late_outcome(
    handle: JoinHandle<PaymentResult<GatewayResponse>>,
    reference: String,
    channel: PaymentChannel,
) -> JoinHandle<Option<GatewayResponse>> {
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(response)) => {
                warn!(
                    reference = %reference,
                    channel = %channel,
                    status = ?response.status,
                    external_transaction_id = ?response.external_transaction_id,
                    "late gateway outcome after timeout"
                );
                Some(response)
            }
            Ok(Err(e)) => {
                warn!(reference = %reference, channel = %channel, error = %e, "late gateway failure after timeout");
                None
            }
            Err(join_error) => {
                error!(reference = %reference, error = %join_error, "timed-out gateway task aborted");
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{Destination, GatewayStatus, MobileWallet, PaymentDirection};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SlowGateway {
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PaymentGateway for SlowGateway {
        fn channel(&self) -> PaymentChannel {
            PaymentChannel::MobileMoney
        }

        async fn execute(&self, _request: &GatewayRequest) -> PaymentResult<GatewayResponse> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(GatewayResponse::completed(None, serde_json::json!({})))
        }

        async fn lookup(&self, _reference: &str) -> PaymentResult<GatewayResponse> {
            Err(PaymentError::NetworkError {
                message: "connection refused".to_string(),
            })
        }
    }

    fn request() -> GatewayRequest {
        GatewayRequest {
            reference: "RPY-20260101-00000000AA".to_string(),
            amount: dec!(100),
            currency: "KES".to_string(),
            direction: PaymentDirection::Collection,
            destination: Destination::MobileWallet(MobileWallet {
                phone_number: "+254712345678".to_string(),
                operator: "mpesa".to_string(),
            }),
            narration: None,
        }
    }

    #[tokio::test]
    async fn timeout_yields_failed_response_and_call_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let router = GatewayRouter::new(Duration::from_millis(20)).with_gateway(Arc::new(SlowGateway {
            finished: finished.clone(),
        }));

        let response = router.execute(&request()).await;
        assert_eq!(response.status, GatewayStatus::Failed);
        assert!(response.is_timeout());
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn late_outcome_is_collected_after_timeout() {
        let gateway: Arc<dyn PaymentGateway> = Arc::new(SlowGateway {
            finished: Arc::new(AtomicBool::new(false)),
        });
        let owned = request();
        let call = tokio::spawn(async move { gateway.execute(&owned).await });

        let late = watch_late_outcome(call, request().reference, PaymentChannel::MobileMoney)
            .await
            .unwrap();
        assert_eq!(late.map(|r| r.status), Some(GatewayStatus::Completed));
    }

    #[tokio::test]
    async fn missing_channel_fails_without_panicking() {
        let router = GatewayRouter::new(Duration::from_secs(1));
        assert!(!router.supports(PaymentChannel::MobileMoney));
        let response = router.execute(&request()).await;
        assert_eq!(response.status, GatewayStatus::Failed);
        assert!(!response.retryable);
    }

    #[tokio::test]
    async fn lookup_errors_propagate() {
        let router = GatewayRouter::new(Duration::from_secs(1)).with_gateway(Arc::new(SlowGateway {
            finished: Arc::new(AtomicBool::new(false)),
        }));
        let result = router.lookup(PaymentChannel::MobileMoney, "RPY-1").await;
        assert!(matches!(result, Err(PaymentError::NetworkError { .. })));
    }
}
