//! Request logging and request-id generation.

use axum::{extract::Request, middleware::Next, response::Response};
use std::future::Future;
use std::time::Instant;
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::{info, warn};
use uuid::Uuid;

/// Generates a v4 UUID for every request lacking an `x-request-id`.
#[derive(Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        Uuid::new_v4().to_string().parse().ok().map(RequestId::new)
    }
}

/// Logs method, path, status and latency for each request.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let latency_ms = start.elapsed().as_millis() as u64;
    if status.is_server_error() {
        warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms,
            request_id = %request_id,
            "request failed"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms,
            request_id = %request_id,
            "request completed"
        );
    }

    response
}

/// Time an outbound call and log its outcome.
pub async fn log_external_call<T, E, F>(service: &str, operation: &str, call: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let result = call.await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match &result {
        Ok(_) => info!(service, operation, elapsed_ms, "external call succeeded"),
        Err(e) => warn!(service, operation, elapsed_ms, error = %e, "external call failed"),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique_uuids() {
        let request = http::Request::new(());
        let mut maker = UuidRequestId;
        let a = maker.make_request_id(&request).unwrap();
        let b = maker.make_request_id(&request).unwrap();

        let a = a.header_value().to_str().unwrap().to_string();
        let b = b.header_value().to_str().unwrap().to_string();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[tokio::test]
    async fn external_call_result_is_passed_through() {
        let ok: Result<u8, String> = log_external_call("clickpesa", "status", async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u8, String> =
            log_external_call("clickpesa", "status", async { Err("down".to_string()) }).await;
        assert_eq!(err, Err("down".to_string()));
    }
}
