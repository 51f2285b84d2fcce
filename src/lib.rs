//! Mobile-money payment backend: ClickPesa USSD push behind a single
//! action-dispatched `/payment` endpoint.

pub mod api;
pub mod auth;
#[cfg(feature = "cache")]
pub mod cache;
pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;

use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::api::payment::PaymentState;
use crate::health::HealthChecker;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};

/// Full application router: payment API, health probes and the request-id
/// and logging layers.
pub fn app_router(payment: PaymentState, health: Arc<HealthChecker>) -> Router {
    Router::new()
        .merge(api::payment::router(payment))
        .merge(health::health_router(health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
