//! Browser-facing CORS headers, added to every response.

use axum::http::{header, HeaderValue};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
pub const ALLOW_METHODS: &str = "POST, OPTIONS";

pub fn with_cors<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static(ALLOW_ORIGIN),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        ))
}
