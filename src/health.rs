//! Health check module
//! Provides health status for the service and its dependencies

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

#[cfg(feature = "cache")]
use crate::cache::RedisPool;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }

    fn record(&mut self, name: &str, component: ComponentHealth) {
        match component.status {
            ComponentState::Down => self.status = HealthState::Unhealthy,
            ComponentState::Warning if self.status == HealthState::Healthy => {
                self.status = HealthState::Degraded
            }
            _ => {}
        }
        self.checks.insert(name.to_string(), component);
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

/// Health checker for the service
#[derive(Clone, Default)]
pub struct HealthChecker {
    db_pool: Option<PgPool>,
    #[cfg(feature = "cache")]
    cache: Option<RedisPool>,
    /// Names of missing provider credential variables
    missing_credentials: Vec<String>,
}

impl HealthChecker {
    pub fn new(db_pool: Option<PgPool>, missing_credentials: Vec<String>) -> Self {
        Self {
            db_pool,
            #[cfg(feature = "cache")]
            cache: None,
            missing_credentials,
        }
    }

    #[cfg(feature = "cache")]
    pub fn with_cache(mut self, cache: Option<RedisPool>) -> Self {
        self.cache = cache;
        self
    }

    /// Perform comprehensive health check
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        if let Some(pool) = &self.db_pool {
            let component = timed_check("database", async {
                crate::database::health_check(pool)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;
            health_status.record("database", component);
        }

        #[cfg(feature = "cache")]
        if let Some(pool) = &self.cache {
            // The credential cache works without Redis, so an outage only degrades.
            let mut component = timed_check("cache", async {
                crate::cache::health_check(pool)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await;
            if component.status == ComponentState::Down {
                component.status = ComponentState::Warning;
            }
            health_status.record("cache", component);
        }

        let provider = if self.missing_credentials.is_empty() {
            ComponentHealth::up(None)
        } else {
            warn!(missing = ?self.missing_credentials, "ClickPesa credentials not configured");
            ComponentHealth::warning(
                None,
                Some(format!("missing {}", self.missing_credentials.join(", "))),
            )
        };
        health_status.record("clickpesa", provider);

        health_status
    }
}

async fn timed_check<F>(name: &str, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), String>>,
{
    let start = Instant::now();
    match timeout(Duration::from_secs(5), check).await {
        Ok(Ok(())) => {
            let elapsed = start.elapsed().as_millis();
            info!("{} health check: OK ({}ms)", name, elapsed);
            ComponentHealth::up(Some(elapsed))
        }
        Ok(Err(e)) => {
            error!("{} health check failed: {}", name, e);
            ComponentHealth::down(Some(e))
        }
        Err(_) => {
            error!("{} health check timed out", name);
            ComponentHealth::down(Some("Timeout".to_string()))
        }
    }
}

pub fn health_router(checker: Arc<HealthChecker>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(checker)
}

async fn health(
    State(checker): State<Arc<HealthChecker>>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = checker.check_health().await;
    if health_status.status == HealthState::Unhealthy {
        error!("Health check failed - service unhealthy");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - all dependencies must answer
async fn readiness(
    state: State<Arc<HealthChecker>>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    health(state).await
}

/// Liveness probe - the process is serving requests
async fn liveness() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100));
        assert_eq!(up_health.status, ComponentState::Up);
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert_eq!(down_health.status, ComponentState::Down);
        assert_eq!(down_health.details, Some("Test error".to_string()));
    }

    #[test]
    fn warnings_degrade_and_failures_win() {
        let mut status = HealthStatus::new();
        status.record("clickpesa", ComponentHealth::warning(None, None));
        assert_eq!(status.status, HealthState::Degraded);

        status.record("database", ComponentHealth::down(None));
        status.record("cache", ComponentHealth::warning(None, None));
        assert_eq!(status.status, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn missing_credentials_are_reported_but_serving() {
        let checker = HealthChecker::new(None, vec!["CLICKPESA_API_KEY".to_string()]);
        let status = checker.check_health().await;

        assert_eq!(status.status, HealthState::Degraded);
        assert_eq!(
            status.checks["clickpesa"].details.as_deref(),
            Some("missing CLICKPESA_API_KEY")
        );
    }

    #[tokio::test]
    async fn liveness_route_responds() {
        let app = health_router(Arc::new(HealthChecker::default()));
        let response = app
            .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
