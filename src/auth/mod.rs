//! Caller identity.
//!
//! The payment endpoint never trusts a user id from the body: the bearer
//! credential is exchanged for an identity with the auth service first.

use crate::config::SupabaseConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserIdentity {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Fails with `Unauthorized` when the token is not accepted.
    async fn resolve(&self, bearer_token: &str) -> AppResult<UserIdentity>;
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Resolves tokens against `GET {SUPABASE_URL}/auth/v1/user`.
pub struct SupabaseIdentityResolver {
    client: Client,
    config: SupabaseConfig,
}

impl SupabaseIdentityResolver {
    pub fn new(config: SupabaseConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                AppError::new(crate::error::AppErrorKind::Infrastructure(
                    crate::error::InfrastructureError::Configuration {
                        message: format!("failed to build auth client: {}", e),
                    },
                ))
            })?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl IdentityResolver for SupabaseIdentityResolver {
    async fn resolve(&self, bearer_token: &str) -> AppResult<UserIdentity> {
        let url = format!("{}/auth/v1/user", self.config.url);
        let response = self
            .client
            .get(&url)
            .header("apikey", &self.config.anon_key)
            .bearer_auth(bearer_token)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "identity lookup failed");
                AppError::unauthorized("identity service unreachable")
            })?;

        if !response.status().is_success() {
            return Err(AppError::unauthorized(format!(
                "identity service returned {}",
                response.status()
            )));
        }

        response
            .json::<UserIdentity>()
            .await
            .map_err(|_| AppError::unauthorized("identity response had no user"))
    }
}
