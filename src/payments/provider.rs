use crate::payments::error::PaymentResult;
use crate::payments::types::{GatewayRequest, GatewayResponse, PaymentChannel};
use async_trait::async_trait;

/// One external payment channel (bank transfer rail, mobile money operator).
///
/// `execute` reports business outcomes (declined, pending) through
/// [`GatewayResponse`]; an `Err` means the call itself could not be completed.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn channel(&self) -> PaymentChannel;

    async fn execute(&self, request: &GatewayRequest) -> PaymentResult<GatewayResponse>;

    /// Ask the channel for the current status of a reference it has seen.
    async fn lookup(&self, reference: &str) -> PaymentResult<GatewayResponse>;

    /// Check a callback signature. Channels without a shared secret accept
    /// every payload.
    fn verify_callback(&self, _payload: &[u8], _signature: Option<&str>) -> PaymentResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{
        BankAccount, Destination, GatewayStatus, PaymentDirection,
    };
    use rust_decimal_macros::dec;

    struct EchoGateway;

    #[async_trait]
    impl PaymentGateway for EchoGateway {
        fn channel(&self) -> PaymentChannel {
            PaymentChannel::BankTransfer
        }

        async fn execute(&self, request: &GatewayRequest) -> PaymentResult<GatewayResponse> {
            Ok(GatewayResponse::completed(
                Some(format!("ext-{}", request.reference)),
                serde_json::json!({ "echo": request.reference }),
            ))
        }

        async fn lookup(&self, reference: &str) -> PaymentResult<GatewayResponse> {
            Ok(GatewayResponse::pending(
                Some(format!("ext-{}", reference)),
                serde_json::json!({}),
            ))
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_gateway() {
        let gateway: Box<dyn PaymentGateway> = Box::new(EchoGateway);
        let response = gateway
            .execute(&GatewayRequest {
                reference: "DSB-20260101-0000000001".to_string(),
                amount: dec!(1000),
                currency: "XOF".to_string(),
                direction: PaymentDirection::Payout,
                destination: Destination::BankAccount(BankAccount {
                    account_number: "0123456789".to_string(),
                    account_name: None,
                    bank_code: None,
                    bank_name: None,
                }),
                narration: None,
            })
            .await
            .expect("execute should succeed");
        assert_eq!(response.status, GatewayStatus::Completed);
        assert_eq!(
            response.external_transaction_id.as_deref(),
            Some("ext-DSB-20260101-0000000001")
        );
        assert!(gateway.verify_callback(b"{}", None).is_ok());
    }
}
