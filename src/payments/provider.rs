use crate::payments::error::PaymentResult;
use crate::payments::types::{PaymentRequest, ProviderResponse};
use async_trait::async_trait;

/// USSD-push mobile-money gateway. Every call carries an access token
/// obtained from a [`crate::payments::token::CredentialCache`].
#[async_trait]
pub trait MobileMoneyGateway: Send + Sync {
    /// Dry-run a payment without charging the customer.
    async fn validate(&self, token: &str, request: &PaymentRequest)
        -> PaymentResult<ProviderResponse>;

    /// Push a payment prompt to the customer's handset.
    async fn initiate(&self, token: &str, request: &PaymentRequest)
        -> PaymentResult<ProviderResponse>;

    async fn check_status(&self, token: &str, transaction_id: &str)
        -> PaymentResult<ProviderResponse>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::MobileNetwork;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    struct EchoGateway;

    #[async_trait]
    impl MobileMoneyGateway for EchoGateway {
        async fn validate(
            &self,
            _token: &str,
            request: &PaymentRequest,
        ) -> PaymentResult<ProviderResponse> {
            Ok(ProviderResponse(json!({ "reference": request.reference })))
        }

        async fn initiate(
            &self,
            token: &str,
            request: &PaymentRequest,
        ) -> PaymentResult<ProviderResponse> {
            Ok(ProviderResponse(json!({
                "transaction_id": format!("{}-{}", token, request.reference),
                "status": "PROCESSING"
            })))
        }

        async fn check_status(
            &self,
            _token: &str,
            transaction_id: &str,
        ) -> PaymentResult<ProviderResponse> {
            Ok(ProviderResponse(json!({ "id": transaction_id, "status": "COMPLETED" })))
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    #[tokio::test]
    async fn trait_can_be_used_as_object() {
        let gateway: Box<dyn MobileMoneyGateway> = Box::new(EchoGateway);
        let request = PaymentRequest {
            amount: BigDecimal::from(1000),
            currency: "TZS".to_string(),
            phone_number: "255712345678".to_string(),
            network: MobileNetwork::Mpesa,
            reference: "ORDER-1".to_string(),
            description: String::new(),
            order_id: None,
            subscription_id: None,
        };

        let initiated = gateway.initiate("tok", &request).await.unwrap();
        assert_eq!(initiated.transaction_id().as_deref(), Some("tok-ORDER-1"));

        let status = gateway.check_status("tok", "T1").await.unwrap();
        assert_eq!(status.status().as_deref(), Some("COMPLETED"));
        assert_eq!(gateway.name(), "echo");
    }
}
