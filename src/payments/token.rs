//! Provider access-token cache.
//!
//! A token is reused until it is within `refresh_buffer` of its expiry. The
//! in-process slot is guarded by an async `RwLock` that is never held while
//! talking to the issuer. Two concurrent misses may both fetch; the later
//! write wins.

use crate::payments::error::PaymentResult;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
pub const REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Exchanges client credentials for a short-lived access token.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(&self) -> PaymentResult<String>;
}

/// Optional second-level store shared between service instances.
#[async_trait]
pub trait SharedTokenStore: Send + Sync {
    /// Returns the token and its remaining lifetime.
    async fn load(&self) -> Option<(String, Duration)>;

    async fn store(&self, token: &str, ttl: Duration);

    async fn clear(&self);
}

#[derive(Clone)]
struct CachedCredential {
    token: String,
    expires_at: Instant,
}

pub struct CredentialCache {
    issuer: Arc<dyn TokenIssuer>,
    shared: Option<Arc<dyn SharedTokenStore>>,
    slot: RwLock<Option<CachedCredential>>,
    ttl: Duration,
    refresh_buffer: Duration,
}

impl CredentialCache {
    pub fn new(issuer: Arc<dyn TokenIssuer>) -> Self {
        Self {
            issuer,
            shared: None,
            slot: RwLock::new(None),
            ttl: TOKEN_TTL,
            refresh_buffer: REFRESH_BUFFER,
        }
    }

    pub fn with_shared_store(mut self, store: Arc<dyn SharedTokenStore>) -> Self {
        self.shared = Some(store);
        self
    }

    pub fn with_lifetimes(mut self, ttl: Duration, refresh_buffer: Duration) -> Self {
        self.ttl = ttl;
        self.refresh_buffer = refresh_buffer;
        self
    }

    /// Return a usable token, fetching a fresh one when the cached token is
    /// missing or about to expire.
    pub async fn get_token(&self) -> PaymentResult<String> {
        let now = Instant::now();
        {
            let slot = self.slot.read().await;
            if let Some(cached) = slot.as_ref() {
                if cached.expires_at > now + self.refresh_buffer {
                    return Ok(cached.token.clone());
                }
            }
        }

        if let Some(shared) = &self.shared {
            if let Some((token, remaining)) = shared.load().await {
                if remaining > self.refresh_buffer {
                    debug!("access token loaded from shared store");
                    self.put(token.clone(), Instant::now() + remaining).await;
                    return Ok(token);
                }
            }
        }

        let token = self.issuer.issue_token().await?;
        let expires_at = Instant::now() + self.ttl;
        self.put(token.clone(), expires_at).await;
        info!(ttl_secs = self.ttl.as_secs(), "issued new provider access token");

        if let Some(shared) = &self.shared {
            shared.store(&token, self.ttl).await;
        }

        Ok(token)
    }

    /// Drop the cached token, e.g. after the provider rejects it.
    pub async fn invalidate(&self) {
        let dropped = self.slot.write().await.take().is_some();
        if let Some(shared) = &self.shared {
            shared.clear().await;
        }
        if dropped {
            warn!("provider access token invalidated");
        }
    }

    pub async fn has_valid_token(&self) -> bool {
        let slot = self.slot.read().await;
        slot.as_ref()
            .is_some_and(|c| c.expires_at > Instant::now() + self.refresh_buffer)
    }

    async fn put(&self, token: String, expires_at: Instant) {
        let mut slot = self.slot.write().await;
        *slot = Some(CachedCredential { token, expires_at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::error::PaymentError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingIssuer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenIssuer for CountingIssuer {
        async fn issue_token(&self) -> PaymentResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{}", n))
        }
    }

    struct FailingIssuer;

    #[async_trait]
    impl TokenIssuer for FailingIssuer {
        async fn issue_token(&self) -> PaymentResult<String> {
            Err(PaymentError::CredentialsNotConfigured {
                missing: vec!["CLICKPESA_CLIENT_ID".to_string()],
            })
        }
    }

    fn cache() -> (Arc<CountingIssuer>, CredentialCache) {
        let issuer = Arc::new(CountingIssuer {
            calls: AtomicUsize::new(0),
        });
        (issuer.clone(), CredentialCache::new(issuer))
    }

    #[tokio::test(start_paused = true)]
    async fn token_is_reused_inside_the_window() {
        let (issuer, cache) = cache();

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        tokio::time::advance(Duration::from_secs(24 * 60)).await;
        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn token_is_refreshed_near_expiry() {
        let (issuer, cache) = cache();

        cache.get_token().await.unwrap();
        // 56 minutes in: less than five minutes of validity left.
        tokio::time::advance(Duration::from_secs(56 * 60)).await;
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_refetch() {
        let (issuer, cache) = cache();

        cache.get_token().await.unwrap();
        assert!(cache.has_valid_token().await);
        cache.invalidate().await;
        assert!(!cache.has_valid_token().await);
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn issuer_errors_are_propagated_and_not_cached() {
        let cache = CredentialCache::new(Arc::new(FailingIssuer));
        let err = cache.get_token().await.unwrap_err();
        assert!(matches!(err, PaymentError::CredentialsNotConfigured { .. }));
        assert!(!cache.has_valid_token().await);
    }

    struct FixedStore;

    #[async_trait]
    impl SharedTokenStore for FixedStore {
        async fn load(&self) -> Option<(String, Duration)> {
            Some(("shared".to_string(), Duration::from_secs(40 * 60)))
        }

        async fn store(&self, _token: &str, _ttl: Duration) {}

        async fn clear(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn shared_store_is_consulted_before_issuing() {
        let (issuer, cache) = cache();
        let cache = cache.with_shared_store(Arc::new(FixedStore));

        assert_eq!(cache.get_token().await.unwrap(), "shared");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
    }
}
