use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::{Client, Method};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

/// Thin JSON client for provider calls. Only idempotent reads are retried:
/// a USSD push or a token request is sent at most once.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::NetworkError {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            provider,
            timeout,
            max_retries,
        })
    }

    /// Send a request and return the parsed JSON body.
    ///
    /// `authorization` is written verbatim into the `Authorization` header.
    pub async fn request_json(
        &self,
        method: Method,
        url: &str,
        authorization: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<JsonValue> {
        let retries = if method == Method::GET {
            self.max_retries
        } else {
            0
        };

        let mut last_error = None;
        for attempt in 0..=retries {
            let mut request = self.client.request(method.clone(), url).timeout(self.timeout);

            if let Some(value) = authorization {
                request = request.header(reqwest::header::AUTHORIZATION, value);
            }
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let resp = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() => {
                    warn!(provider = self.provider, url, attempt = attempt + 1, "provider request timed out");
                    last_error = Some(PaymentError::Timeout {
                        provider: self.provider.to_string(),
                        timeout_secs: self.timeout.as_secs(),
                    });
                    if attempt < retries {
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                    continue;
                }
                Err(e) => {
                    last_error = Some(PaymentError::NetworkError {
                        message: format!("{} request failed: {}", self.provider, e),
                    });
                    if attempt < retries {
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                    continue;
                }
            };

            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();

            if status.is_success() {
                return serde_json::from_str::<JsonValue>(&text).map_err(|e| {
                    PaymentError::GatewayError {
                        provider: self.provider.to_string(),
                        message: format!("invalid JSON response: {}", e),
                        provider_code: None,
                        retryable: false,
                    }
                });
            }

            if status.as_u16() == 429 {
                if attempt < retries {
                    tokio::time::sleep(backoff(attempt)).await;
                    continue;
                }
                return Err(PaymentError::RateLimitError {
                    message: format!("{} rate limit exceeded", self.provider),
                    retry_after_seconds: None,
                });
            }

            if status.is_server_error() && attempt < retries {
                warn!(
                    provider = self.provider,
                    status = %status,
                    attempt = attempt + 1,
                    "provider server error, retrying"
                );
                tokio::time::sleep(backoff(attempt)).await;
                continue;
            }

            return Err(PaymentError::GatewayError {
                provider: self.provider.to_string(),
                message: text,
                provider_code: Some(status.as_u16().to_string()),
                retryable: status.is_server_error(),
            });
        }

        Err(last_error.unwrap_or(PaymentError::NetworkError {
            message: format!("{} request failed", self.provider),
        }))
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(250 * (1 << attempt.min(4)))
}
