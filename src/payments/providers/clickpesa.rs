use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::MobileMoneyGateway;
use crate::payments::token::TokenIssuer;
use crate::payments::types::{PaymentRequest, ProviderResponse};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, info};

const PROVIDER: &str = "clickpesa";

#[derive(Debug, Clone)]
pub struct ClickPesaConfig {
    pub client_id: Option<String>,
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ClickPesaConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            api_key: None,
            base_url: "https://api.clickpesa.com/third-parties".to_string(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl ClickPesaConfig {
    /// Credentials are optional here; their absence is reported when a token
    /// is first requested so the service can still boot and answer health checks.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            client_id: non_empty_env("CLICKPESA_CLIENT_ID"),
            api_key: non_empty_env("CLICKPESA_API_KEY"),
            base_url: std::env::var("CLICKPESA_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            timeout_secs: std::env::var("CLICKPESA_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("CLICKPESA_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        }
    }

    pub fn missing_credentials(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.client_id.is_none() {
            missing.push("CLICKPESA_CLIENT_ID".to_string());
        }
        if self.api_key.is_none() {
            missing.push("CLICKPESA_API_KEY".to_string());
        }
        missing
    }

    pub fn has_credentials(&self) -> bool {
        self.missing_credentials().is_empty()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    token: Option<String>,
}

pub struct ClickPesaGateway {
    config: ClickPesaConfig,
    http: PaymentHttpClient,
}

impl ClickPesaGateway {
    pub fn new(config: ClickPesaConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            PROVIDER,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(ClickPesaConfig::from_env())
    }

    pub fn config(&self) -> &ClickPesaConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn transaction_url(&self, transaction_id: &str) -> PaymentResult<Url> {
        let mut url = Url::parse(&self.endpoint("/transactions")).map_err(|e| {
            PaymentError::ValidationError {
                message: format!("invalid CLICKPESA_BASE_URL: {}", e),
                field: Some("CLICKPESA_BASE_URL".to_string()),
            }
        })?;
        url.path_segments_mut()
            .map_err(|_| PaymentError::ValidationError {
                message: "CLICKPESA_BASE_URL cannot be a base".to_string(),
                field: Some("CLICKPESA_BASE_URL".to_string()),
            })?
            .push(transaction_id);
        Ok(url)
    }

    async fn post_push(
        &self,
        path: &str,
        token: &str,
        request: &PaymentRequest,
    ) -> PaymentResult<ProviderResponse> {
        let body = request.provider_body();
        let response = self
            .http
            .request_json(Method::POST, &self.endpoint(path), Some(token), Some(&body), &[])
            .await?;
        Ok(ProviderResponse(response))
    }
}

#[async_trait]
impl TokenIssuer for ClickPesaGateway {
    async fn issue_token(&self) -> PaymentResult<String> {
        let (client_id, api_key) = match (&self.config.client_id, &self.config.api_key) {
            (Some(id), Some(key)) => (id.as_str(), key.as_str()),
            _ => {
                return Err(PaymentError::CredentialsNotConfigured {
                    missing: self.config.missing_credentials(),
                })
            }
        };

        let raw = self
            .http
            .request_json(
                Method::POST,
                &self.endpoint("/generate-token"),
                None,
                None,
                &[("client-id", client_id), ("api-key", api_key)],
            )
            .await
            .map_err(|err| match err {
                PaymentError::GatewayError { message, .. } => {
                    PaymentError::AuthenticationFailed { message }
                }
                other => other,
            })?;

        let parsed: TokenResponse =
            serde_json::from_value(raw).map_err(|_| invalid_auth_response())?;
        match parsed.token.filter(|t| !t.is_empty()) {
            Some(token) if parsed.success => {
                debug!(provider = PROVIDER, "access token issued");
                Ok(token)
            }
            _ => Err(invalid_auth_response()),
        }
    }
}

fn invalid_auth_response() -> PaymentError {
    PaymentError::GatewayError {
        provider: PROVIDER.to_string(),
        message: "Invalid response from ClickPesa auth".to_string(),
        provider_code: None,
        retryable: false,
    }
}

#[async_trait]
impl MobileMoneyGateway for ClickPesaGateway {
    async fn validate(
        &self,
        token: &str,
        request: &PaymentRequest,
    ) -> PaymentResult<ProviderResponse> {
        self.post_push("/ussd-push/preview", token, request)
            .await
            .map_err(|e| e.with_step("Payment validation failed"))
    }

    async fn initiate(
        &self,
        token: &str,
        request: &PaymentRequest,
    ) -> PaymentResult<ProviderResponse> {
        let response = self
            .post_push("/ussd-push", token, request)
            .await
            .map_err(|e| e.with_step("Payment initiation failed"))?;
        info!(
            provider = PROVIDER,
            reference = %request.reference,
            network = %request.network,
            "ussd push accepted"
        );
        Ok(response)
    }

    async fn check_status(
        &self,
        token: &str,
        transaction_id: &str,
    ) -> PaymentResult<ProviderResponse> {
        let url = self.transaction_url(transaction_id)?;
        let response = self
            .http
            .request_json(Method::GET, url.as_str(), Some(token), None, &[])
            .await
            .map_err(|e| e.with_step("Failed to check payment status"))?;

        // Some query endpoints answer with a one-element list.
        let response = match response {
            JsonValue::Array(mut items) if items.len() == 1 => items.remove(0),
            other => other,
        };
        Ok(ProviderResponse(response))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::MobileNetwork;
    use bigdecimal::BigDecimal;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> ClickPesaGateway {
        ClickPesaGateway::new(ClickPesaConfig {
            client_id: Some("cid".to_string()),
            api_key: Some("key".to_string()),
            base_url: server.uri(),
            timeout_secs: 5,
            max_retries: 0,
        })
        .unwrap()
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            amount: BigDecimal::from(5000),
            currency: "TZS".to_string(),
            phone_number: "255712345678".to_string(),
            network: MobileNetwork::Mpesa,
            reference: "ORDER-ABCDEF12".to_string(),
            description: "Order payment".to_string(),
            order_id: None,
            subscription_id: None,
        }
    }

    #[tokio::test]
    async fn issue_token_sends_credential_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-token"))
            .and(header("client-id", "cid"))
            .and(header("api-key", "key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "success": true, "token": "Bearer xyz" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(gateway(&server).issue_token().await.unwrap(), "Bearer xyz");
    }

    #[tokio::test]
    async fn issue_token_rejects_unsuccessful_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
            .mount(&server)
            .await;

        let err = gateway(&server).issue_token().await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid response from ClickPesa auth");
    }

    #[tokio::test]
    async fn issue_token_surfaces_auth_failure_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let err = gateway(&server).issue_token().await.unwrap_err();
        assert!(matches!(err, PaymentError::AuthenticationFailed { .. }));
        assert!(err.to_string().contains("bad credentials"));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_request() {
        let server = MockServer::start().await;
        let gateway = ClickPesaGateway::new(ClickPesaConfig {
            base_url: server.uri(),
            ..ClickPesaConfig::default()
        })
        .unwrap();

        let err = gateway.issue_token().await.unwrap_err();
        match err {
            PaymentError::CredentialsNotConfigured { missing } => {
                assert_eq!(missing, vec!["CLICKPESA_CLIENT_ID", "CLICKPESA_API_KEY"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn initiate_posts_ussd_push_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ussd-push"))
            .and(header("authorization", "Bearer xyz"))
            .and(body_json(json!({
                "amount": 5000,
                "currency": "TZS",
                "phone_number": "255712345678",
                "network": "MPESA",
                "reference": "ORDER-ABCDEF12",
                "description": "Order payment"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "transaction_id": "CP-1", "status": "PROCESSING" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = gateway(&server).initiate("Bearer xyz", &request()).await.unwrap();
        assert_eq!(response.transaction_id().as_deref(), Some("CP-1"));
    }

    #[tokio::test]
    async fn validate_failure_is_prefixed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ussd-push/preview"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid phone"))
            .mount(&server)
            .await;

        let err = gateway(&server).validate("t", &request()).await.unwrap_err();
        assert_eq!(err.to_string(), "Payment validation failed: invalid phone");
    }

    #[tokio::test]
    async fn check_status_reads_transaction() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transactions/CP-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{ "status": "COMPLETED" }])),
            )
            .mount(&server)
            .await;

        let response = gateway(&server).check_status("t", "CP-1").await.unwrap();
        assert_eq!(response.status().as_deref(), Some("COMPLETED"));
    }

    #[tokio::test]
    async fn check_status_failure_is_prefixed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transactions/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let err = gateway(&server).check_status("t", "missing").await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to check payment status: not found");
    }
}
