//! `POST /payment`: a single action-dispatched endpoint.
//!
//! The caller is resolved from the bearer token before the body is read.

use crate::auth::{bearer_token, IdentityResolver};
use crate::error::{AppError, AppErrorKind, AppResult, ValidationError};
use crate::middleware::cors::{with_cors, ALLOW_METHODS};
use crate::middleware::error::{get_request_id_from_headers, success_response};
use crate::payments::types::{PaymentPayload, StatusQuery};
use crate::services::payment_orchestrator::PaymentOrchestrator;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

/// State for the payment API
#[derive(Clone)]
pub struct PaymentState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub identity: Arc<dyn IdentityResolver>,
}

/// Body actions accepted by `POST /payment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentAction {
    Validate,
    Initiate,
    CheckStatus,
}

impl PaymentAction {
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "validate" => Some(Self::Validate),
            "initiate" => Some(Self::Initiate),
            "check-status" => Some(Self::CheckStatus),
            _ => None,
        }
    }
}

pub fn router(state: PaymentState) -> Router {
    with_cors(
        Router::new()
            .route("/payment", post(handle_payment).options(options_payment))
            .with_state(state),
    )
}

/// POST /payment
pub async fn handle_payment(
    State(state): State<PaymentState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = get_request_id_from_headers(&headers);
    match dispatch(&state, &headers, &body).await {
        Ok(data) => success_response(data),
        Err(err) => match request_id {
            Some(id) => err.with_request_id(id).into_response(),
            None => err.into_response(),
        },
    }
}

/// OPTIONS /payment
pub async fn options_payment() -> Response {
    (
        StatusCode::NO_CONTENT,
        [(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        )],
    )
        .into_response()
}

async fn dispatch(state: &PaymentState, headers: &HeaderMap, body: &[u8]) -> AppResult<JsonValue> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;
    let user = state.identity.resolve(&token).await?;

    let body: JsonValue = serde_json::from_slice(body).map_err(malformed)?;
    let action_name = body
        .get("action")
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    let action = action_name
        .as_deref()
        .and_then(PaymentAction::parse)
        .ok_or_else(|| {
            warn!(user_id = %user.id, action = ?action_name, "invalid payment action");
            AppError::invalid_action(action_name.clone())
        })?;

    info!(user_id = %user.id, action = ?action, "payment request");

    match action {
        PaymentAction::Validate => {
            let payload: PaymentPayload = parse_fields(body)?;
            state.orchestrator.validate(&user, payload).await
        }
        PaymentAction::Initiate => {
            let payload: PaymentPayload = parse_fields(body)?;
            state.orchestrator.initiate(&user, payload).await
        }
        PaymentAction::CheckStatus => {
            let query: StatusQuery = parse_fields(body)?;
            state.orchestrator.check_status(&user, query).await
        }
    }
}

fn parse_fields<T: DeserializeOwned>(body: JsonValue) -> AppResult<T> {
    serde_json::from_value(body).map_err(malformed)
}

fn malformed(err: serde_json::Error) -> AppError {
    AppError::new(AppErrorKind::Validation(ValidationError::MalformedBody {
        reason: err.to_string(),
    }))
}
