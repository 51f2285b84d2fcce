//! Application error type for the payment service.
//!
//! Every failure that reaches the HTTP boundary is an [`AppError`]. The kind
//! decides the status code and the machine-readable [`ErrorCode`]; the user
//! message ends up in the `error` field of the response envelope.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    ValidationError,
    InvalidAction,
    TransactionNotFound,

    DatabaseError,
    ConfigurationError,
    CredentialsNotConfigured,

    PaymentProviderError,
    ExternalServiceTimeout,
}

/// Caller identity problems
#[derive(Debug, Clone)]
pub enum AuthError {
    /// No bearer credential, or the identity service rejected it
    Unauthorized { reason: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// One or more required fields are absent
    MissingFields { fields: Vec<String> },
    /// check-status received neither identifier
    MissingIdentifier,
    /// A present field has an unusable value
    InvalidField { field: String, reason: String },
    /// Body is not valid JSON
    MalformedBody { reason: String },
    /// Unknown or absent `action`
    InvalidAction { action: Option<String> },
}

/// Business-level errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No ledger row (or no provider id) for the reference
    TransactionNotFound { reference: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
    /// Provider client id / api key absent
    CredentialsNotConfigured { missing: Vec<String> },
}

/// External service errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    /// Preview endpoint refused the payment details
    PaymentRejected { message: String },
    Timeout { service: String, timeout_secs: u64 },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Auth(AuthError),
    Validation(ValidationError),
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Auth(AuthError::Unauthorized {
            reason: reason.into(),
        }))
    }

    pub fn missing_fields(fields: &[&str]) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::MissingFields {
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }))
    }

    pub fn invalid_field(field: &str, reason: &str) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.to_string(),
            reason: reason.to_string(),
        }))
    }

    pub fn invalid_action(action: Option<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidAction {
            action,
        }))
    }

    pub fn transaction_not_found(reference: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
            reference: reference.into(),
        }))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Auth(_) => 401,
            AppErrorKind::Validation(_) => 400,
            AppErrorKind::Domain(DomainError::TransactionNotFound { .. }) => 404,
            // Provider and infrastructure failures both surface as 500 with
            // the underlying message in the envelope.
            AppErrorKind::Infrastructure(_) | AppErrorKind::External(_) => 500,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Auth(_) => ErrorCode::Unauthorized,
            AppErrorKind::Validation(ValidationError::InvalidAction { .. }) => {
                ErrorCode::InvalidAction
            }
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
            AppErrorKind::Domain(DomainError::TransactionNotFound { .. }) => {
                ErrorCode::TransactionNotFound
            }
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::CredentialsNotConfigured { .. } => {
                    ErrorCode::CredentialsNotConfigured
                }
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } | ExternalError::PaymentRejected { .. } => {
                    ErrorCode::PaymentProviderError
                }
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
        }
    }

    /// Message placed in the `error` field of the response envelope
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Auth(_) => "Unauthorized".to_string(),
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingFields { fields } => {
                    format!("Missing required payment fields: {}", fields.join(", "))
                }
                ValidationError::MissingIdentifier => {
                    "Missing required field: transaction_id or reference".to_string()
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid field '{}': {}", field, reason)
                }
                ValidationError::MalformedBody { reason } => {
                    format!("Invalid request body: {}", reason)
                }
                ValidationError::InvalidAction { .. } => "Invalid action".to_string(),
            },
            AppErrorKind::Domain(DomainError::TransactionNotFound { .. }) => {
                "Transaction ID not found".to_string()
            }
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::CredentialsNotConfigured { missing } => format!(
                    "Payment provider credentials not configured: missing {}",
                    missing.join(", ")
                ),
                InfrastructureError::Database { .. } | InfrastructureError::Configuration { .. } => {
                    "Service temporarily unavailable. Please try again later".to_string()
                }
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { message, .. } => message.clone(),
                ExternalError::PaymentRejected { message } => message.clone(),
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Auth(_) | AppErrorKind::Validation(_) | AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. }
                | InfrastructureError::CredentialsNotConfigured { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::PaymentRejected { .. } => false,
                ExternalError::Timeout { .. } => true,
            },
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in payments/error.rs

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_error() {
        let error = AppError::unauthorized("missing bearer token");

        assert_eq!(error.status_code(), 401);
        assert_eq!(error.error_code(), ErrorCode::Unauthorized);
        assert_eq!(error.user_message(), "Unauthorized");
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_missing_fields_error() {
        let error = AppError::missing_fields(&["amount", "reference"]);

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert_eq!(
            error.user_message(),
            "Missing required payment fields: amount, reference"
        );
    }

    #[test]
    fn test_invalid_action_error() {
        let error = AppError::invalid_action(Some("refund".to_string()));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::InvalidAction);
        assert_eq!(error.user_message(), "Invalid action");
    }

    #[test]
    fn test_not_found_error() {
        let error = AppError::transaction_not_found("ORDER-1");

        assert_eq!(error.status_code(), 404);
        assert_eq!(error.user_message(), "Transaction ID not found");
    }

    #[test]
    fn test_provider_error_keeps_message() {
        let error = AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
            provider: "clickpesa".to_string(),
            message: "Payment initiation failed: insufficient funds".to_string(),
            is_retryable: false,
        }));

        assert_eq!(error.status_code(), 500);
        assert_eq!(error.error_code(), ErrorCode::PaymentProviderError);
        assert_eq!(
            error.user_message(),
            "Payment initiation failed: insufficient funds"
        );
    }

    #[test]
    fn test_credentials_not_configured_error() {
        let error = AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::CredentialsNotConfigured {
                missing: vec!["CLICKPESA_API_KEY".to_string()],
            },
        ));

        assert_eq!(error.status_code(), 500);
        assert_eq!(error.error_code(), ErrorCode::CredentialsNotConfigured);
        assert!(error.user_message().contains("CLICKPESA_API_KEY"));
    }
}
