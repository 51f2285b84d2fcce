//! Response envelope for the payment API.
//!
//! Every response body has the shape `{ success, data?, error?, code? }`.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Failure envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `false`
    pub success: bool,

    /// Human-readable error message
    pub error: String,

    /// Machine-readable error code
    pub code: ErrorCode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            success: false,
            error: error.user_message(),
            code: error.error_code(),
            request_id: error.request_id.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = ?self.kind,
                context = ?self.context,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = ?self.kind,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let error_response = ErrorResponse::from_app_error(&self);
        (status_code, Json(error_response)).into_response()
    }
}

/// `{ "success": true, "data": <data> }`
pub fn success_response<T: Serialize>(data: T) -> Response {
    Json(serde_json::json!({
        "success": true,
        "data": data,
    }))
    .into_response()
}

/// Helper to extract request ID from request headers
pub fn get_request_id_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
