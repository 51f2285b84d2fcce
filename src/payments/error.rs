use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Payment provider credentials not configured: missing {}", missing.join(", "))]
    CredentialsNotConfigured { missing: Vec<String> },

    #[error("Failed to authenticate with payment provider: {message}")]
    AuthenticationFailed { message: String },

    #[error("{message}")]
    GatewayError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("{provider} request timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::CredentialsNotConfigured { .. } => false,
            PaymentError::AuthenticationFailed { .. } => true,
            PaymentError::GatewayError { retryable, .. } => *retryable,
            PaymentError::NetworkError { .. } => true,
            PaymentError::Timeout { .. } => true,
            PaymentError::RateLimitError { .. } => true,
        }
    }

    /// Prefix a gateway failure with the step that produced it, keeping the
    /// provider body intact so callers see what the provider said.
    pub fn with_step(self, step: &str) -> Self {
        match self {
            PaymentError::GatewayError {
                provider,
                message,
                provider_code,
                retryable,
            } => PaymentError::GatewayError {
                provider,
                message: format!("{}: {}", step, message),
                provider_code,
                retryable,
            },
            PaymentError::ValidationError { message, field } => PaymentError::ValidationError {
                message: format!("{}: {}", step, message),
                field,
            },
            other => other,
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, InfrastructureError};

        let kind = match err {
            PaymentError::CredentialsNotConfigured { missing } => AppErrorKind::Infrastructure(
                InfrastructureError::CredentialsNotConfigured { missing },
            ),
            PaymentError::ValidationError { message, .. } => {
                AppErrorKind::External(ExternalError::PaymentRejected { message })
            }
            PaymentError::Timeout {
                provider,
                timeout_secs,
            } => AppErrorKind::External(ExternalError::Timeout {
                service: provider,
                timeout_secs,
            }),
            other => AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "clickpesa".to_string(),
                is_retryable: other.is_retryable(),
                message: other.to_string(),
            }),
        };

        AppError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::CredentialsNotConfigured {
            missing: vec!["CLICKPESA_API_KEY".to_string()]
        }
        .is_retryable());
    }

    #[test]
    fn credentials_message_names_missing_variables() {
        let err = PaymentError::CredentialsNotConfigured {
            missing: vec![
                "CLICKPESA_CLIENT_ID".to_string(),
                "CLICKPESA_API_KEY".to_string(),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("credentials not configured"));
        assert!(message.contains("CLICKPESA_CLIENT_ID, CLICKPESA_API_KEY"));
    }

    #[test]
    fn with_step_prefixes_gateway_message() {
        let err = PaymentError::GatewayError {
            provider: "clickpesa".to_string(),
            message: "HTTP 400: bad phone".to_string(),
            provider_code: Some("400".to_string()),
            retryable: false,
        }
        .with_step("Payment initiation failed");
        assert_eq!(err.to_string(), "Payment initiation failed: HTTP 400: bad phone");
    }

    #[test]
    fn converts_to_app_error_status() {
        let missing: crate::error::AppError = PaymentError::CredentialsNotConfigured {
            missing: vec!["CLICKPESA_API_KEY".to_string()],
        }
        .into();
        assert_eq!(missing.status_code(), 500);

        let gateway: crate::error::AppError = PaymentError::GatewayError {
            provider: "clickpesa".to_string(),
            message: "Payment initiation failed: busy".to_string(),
            provider_code: Some("503".to_string()),
            retryable: true,
        }
        .into();
        assert_eq!(gateway.user_message(), "Payment initiation failed: busy");
        assert!(gateway.is_retryable());

        let timeout: crate::error::AppError = PaymentError::Timeout {
            provider: "clickpesa".to_string(),
            timeout_secs: 30,
        }
        .into();
        assert_eq!(timeout.status_code(), 500);
        assert_eq!(
            timeout.error_code(),
            crate::error::ErrorCode::ExternalServiceTimeout
        );
        assert_eq!(
            timeout.user_message(),
            "clickpesa request timed out after 30 seconds. Please try again"
        );
        assert!(timeout.is_retryable());
    }
}
