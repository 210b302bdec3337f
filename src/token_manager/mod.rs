//! TokenManager - Credential Session Lifecycle
//!
//! ## Responsibilities
//!
//! - Cache the chained credential pair (OAuth access token + camera session token)
//! - Transparent refresh on expiry, single-flight under concurrency
//! - Forced invalidation when the upstream revokes the session
//!
//! The refresh chain is two sequential exchanges: refresh credential ->
//! access token, then access token -> session token. Partial success is
//! discarded; no partially valid session is ever published.

use crate::error::Result;
use crate::nest_client::AuthService;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Refresh this many seconds before the session token actually expires
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Consecutive refresh failures before the process-level alert fires
const AUTH_FAILURE_ALERT_THRESHOLD: u32 = 5;

/// A token with its expiry, as returned by one exchange step
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// The credential pair enabling authenticated camera API calls
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub session_token: String,
    pub access_token_expiry: DateTime<Utc>,
    pub session_token_expiry: DateTime<Utc>,
}

impl Session {
    /// Whether the session token is still usable, with a safety margin
    pub fn is_valid(&self) -> bool {
        self.session_token_expiry > Utc::now() + ChronoDuration::seconds(EXPIRY_MARGIN_SECS)
    }
}

/// Token lifecycle manager
pub struct TokenManager {
    auth: Arc<dyn AuthService>,
    refresh_credential: String,
    client_id: String,
    cached: RwLock<Option<Session>>,
    /// Held across the whole refresh chain so concurrent callers observe a
    /// single in-flight refresh
    refresh_lock: Mutex<()>,
    consecutive_failures: AtomicU32,
}

impl TokenManager {
    /// Create new token manager
    pub fn new(auth: Arc<dyn AuthService>, refresh_credential: String, client_id: String) -> Self {
        Self {
            auth,
            refresh_credential,
            client_id,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Return a valid session, refreshing transparently if expired or absent.
    ///
    /// Late callers arriving during a refresh await the same refresh rather
    /// than triggering a duplicate chain.
    pub async fn acquire(&self) -> Result<Session> {
        if let Some(session) = self.cached_valid().await {
            return Ok(session);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have completed the refresh while we waited
        if let Some(session) = self.cached_valid().await {
            return Ok(session);
        }

        self.refresh_chain().await
    }

    /// Force the next acquire() to run the full refresh chain
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        tracing::info!("Session invalidated, next acquire will refresh");
    }

    async fn cached_valid(&self) -> Option<Session> {
        let cached = self.cached.read().await;
        cached.as_ref().filter(|s| s.is_valid()).cloned()
    }

    /// Run both exchange steps. Either both succeed or the cache stays empty.
    async fn refresh_chain(&self) -> Result<Session> {
        let access = match self
            .auth
            .refresh_access_token(&self.refresh_credential, &self.client_id)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                self.record_failure(&e);
                return Err(e);
            }
        };

        let session_token = match self.auth.issue_session_token(&access.token).await {
            Ok(token) => token,
            Err(e) => {
                // Discard the access token too; a half-refreshed session is
                // never published.
                self.record_failure(&e);
                return Err(e);
            }
        };

        let session = Session {
            access_token: access.token,
            session_token: session_token.token,
            access_token_expiry: access.expires_at,
            session_token_expiry: session_token.expires_at,
        };

        *self.cached.write().await = Some(session.clone());
        self.consecutive_failures.store(0, Ordering::Relaxed);

        tracing::info!(
            session_expiry = %session.session_token_expiry,
            "Session refreshed"
        );

        Ok(session)
    }

    fn record_failure(&self, error: &crate::error::Error) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= AUTH_FAILURE_ALERT_THRESHOLD {
            tracing::error!(
                consecutive_failures = failures,
                error = %error,
                "Credential exhaustion: repeated refresh failures, camera API calls cannot succeed"
            );
        } else {
            tracing::warn!(
                consecutive_failures = failures,
                error = %error,
                "Session refresh failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthStage, Error};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct MockAuth {
        access_calls: AtomicUsize,
        session_calls: AtomicUsize,
        fail_session: bool,
    }

    impl MockAuth {
        fn new() -> Self {
            Self {
                access_calls: AtomicUsize::new(0),
                session_calls: AtomicUsize::new(0),
                fail_session: false,
            }
        }

        fn failing_session() -> Self {
            Self {
                fail_session: true,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl AuthService for MockAuth {
        async fn refresh_access_token(
            &self,
            _refresh_credential: &str,
            _client_id: &str,
        ) -> Result<IssuedToken> {
            self.access_calls.fetch_add(1, Ordering::SeqCst);
            // Simulate network latency so concurrent callers overlap
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(IssuedToken {
                token: "access-token".to_string(),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            })
        }

        async fn issue_session_token(&self, _access_token: &str) -> Result<IssuedToken> {
            self.session_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_session {
                return Err(Error::auth(AuthStage::Session, "jwt endpoint returned 500"));
            }
            Ok(IssuedToken {
                token: "session-token".to_string(),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            })
        }
    }

    fn manager(auth: Arc<MockAuth>) -> Arc<TokenManager> {
        Arc::new(TokenManager::new(
            auth,
            "refresh-cred".to_string(),
            "client-id".to_string(),
        ))
    }

    #[tokio::test]
    async fn test_acquire_returns_valid_session() {
        let manager = manager(Arc::new(MockAuth::new()));
        let session = manager.acquire().await.unwrap();
        assert!(!session.session_token.is_empty());
        assert!(session.session_token_expiry > Utc::now());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_refresh() {
        let auth = Arc::new(MockAuth::new());
        let manager = manager(auth.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = manager.clone();
            handles.push(tokio::spawn(async move { m.acquire().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(auth.access_calls.load(Ordering::SeqCst), 1);
        assert_eq!(auth.session_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_partial_refresh_publishes_nothing() {
        let auth = Arc::new(MockAuth::failing_session());
        let manager = manager(auth.clone());

        let err = manager.acquire().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Auth {
                stage: AuthStage::Session,
                ..
            }
        ));

        // Both steps run again on the next acquire: nothing was cached
        let _ = manager.acquire().await;
        assert_eq!(auth.access_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_full_chain() {
        let auth = Arc::new(MockAuth::new());
        let manager = manager(auth.clone());

        manager.acquire().await.unwrap();
        manager.acquire().await.unwrap();
        assert_eq!(auth.access_calls.load(Ordering::SeqCst), 1);

        manager.invalidate().await;
        manager.acquire().await.unwrap();
        assert_eq!(auth.access_calls.load(Ordering::SeqCst), 2);
    }
}
