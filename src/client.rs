//! Client for the `/payment` endpoint, as used by checkout and subscription
//! flows.
//!
//! Phone numbers are normalised and checked here before anything is sent, so
//! an obviously wrong number never produces a USSD push.

use crate::payments::phone::normalize_and_validate;
use crate::payments::types::PaymentRequest;
use crate::workers::payment_poller::StatusSource;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid phone number: {input}")]
    InvalidPhoneNumber { input: String },

    #[error("Payment API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response from payment API: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct PaymentApiClient {
    http: Client,
    endpoint: String,
    access_token: String,
    country_prefix: String,
}

impl PaymentApiClient {
    /// `base_url` is the service root; the client talks to `{base_url}/payment`.
    pub fn new(
        base_url: &str,
        access_token: impl Into<String>,
        country_prefix: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/payment", base_url.trim_end_matches('/')),
            access_token: access_token.into(),
            country_prefix: country_prefix.into(),
        })
    }

    pub async fn validate(&self, request: &PaymentRequest) -> Result<JsonValue, ClientError> {
        let body = self.payment_body("validate", request)?;
        self.call(body).await
    }

    /// Push the payment prompt. Returns the provider result, including its
    /// `transaction_id`.
    pub async fn initiate(&self, request: &PaymentRequest) -> Result<JsonValue, ClientError> {
        let body = self.payment_body("initiate", request)?;
        self.call(body).await
    }

    /// Check by our own reference; the server resolves the provider id.
    pub async fn check_status(&self, reference: &str) -> Result<JsonValue, ClientError> {
        self.call(json!({ "action": "check-status", "reference": reference }))
            .await
    }

    fn payment_body(&self, action: &str, request: &PaymentRequest) -> Result<JsonValue, ClientError> {
        let phone = normalize_and_validate(&request.phone_number, &self.country_prefix).ok_or_else(
            || ClientError::InvalidPhoneNumber {
                input: request.phone_number.clone(),
            },
        )?;

        let mut body = request.provider_body();
        body["action"] = json!(action);
        body["phone_number"] = json!(phone);
        if let Some(order_id) = request.order_id {
            body["order_id"] = json!(order_id);
        }
        if let Some(subscription_id) = request.subscription_id {
            body["subscription_id"] = json!(subscription_id);
        }
        Ok(body)
    }

    async fn call(&self, body: JsonValue) -> Result<JsonValue, ClientError> {
        debug!(action = ?body.get("action"), "calling payment API");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let envelope: JsonValue = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

        if status.is_success() && envelope["success"] == json!(true) {
            return Ok(envelope.get("data").cloned().unwrap_or(JsonValue::Null));
        }

        Err(ClientError::Api {
            status: status.as_u16(),
            message: envelope["error"]
                .as_str()
                .unwrap_or("payment request failed")
                .to_string(),
        })
    }
}

#[async_trait]
impl StatusSource for PaymentApiClient {
    async fn fetch_status(&self, reference: &str) -> Result<Option<String>, ClientError> {
        let data = self.check_status(reference).await?;
        Ok(data
            .get("status")
            .and_then(JsonValue::as_str)
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::MobileNetwork;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(phone: &str) -> PaymentRequest {
        PaymentRequest {
            amount: BigDecimal::from_str("25000").unwrap(),
            currency: "TZS".to_string(),
            phone_number: phone.to_string(),
            network: MobileNetwork::AirtelMoney,
            reference: "ORDER-1A2B3C4D".to_string(),
            description: "Blinno Order Payment - 2 item(s)".to_string(),
            order_id: None,
            subscription_id: None,
        }
    }

    #[tokio::test]
    async fn initiate_sends_normalised_phone() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payment"))
            .and(header("authorization", "Bearer session"))
            .and(body_partial_json(json!({
                "action": "initiate",
                "phone_number": "255712345678",
                "network": "AIRTELMONEY",
                "amount": 25000
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "transaction_id": "CP123", "status": "PROCESSING" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = PaymentApiClient::new(&server.uri(), "session", "255").unwrap();
        let data = client.initiate(&request("0712 345 678")).await.unwrap();
        assert_eq!(data["transaction_id"], "CP123");
    }

    #[tokio::test]
    async fn invalid_phone_is_rejected_locally() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = PaymentApiClient::new(&server.uri(), "session", "255").unwrap();
        let err = client.initiate(&request("07123")).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidPhoneNumber { .. }));
    }

    #[tokio::test]
    async fn error_envelope_becomes_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payment"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "success": false,
                "error": "Transaction ID not found",
                "code": "TRANSACTION_NOT_FOUND"
            })))
            .mount(&server)
            .await;

        let client = PaymentApiClient::new(&server.uri(), "session", "255").unwrap();
        match client.check_status("ORDER-MISSING").await.unwrap_err() {
            ClientError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Transaction ID not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn status_source_reads_data_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payment"))
            .and(body_partial_json(json!({
                "action": "check-status",
                "reference": "ORDER-1A2B3C4D"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "status": "COMPLETED" }
            })))
            .mount(&server)
            .await;

        let client = PaymentApiClient::new(&server.uri(), "session", "255").unwrap();
        let status = client.fetch_status("ORDER-1A2B3C4D").await.unwrap();
        assert_eq!(status.as_deref(), Some("COMPLETED"));
    }
}
