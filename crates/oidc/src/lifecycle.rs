//! Token lifecycle operations
//!
//! Refresh, introspection, revocation, and user info against the provider's
//! endpoints, keyed off the token set in the session store. Refresh is
//! single-flight: concurrent callers coalesce onto one token-endpoint
//! request so a rotated refresh token is never raced.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{OAuthClient, OAuthClientError};
use crate::metadata::ProviderMetadata;
use crate::store::{SecureSessionStore, StoreError};
use crate::types::{IntrospectionResult, OAuthErrorResponse, TokenSet, TokenTypeHint};

/// Error type for token lifecycle operations
#[derive(Debug)]
pub enum TokenError {
    /// No token set is persisted (not authenticated)
    NoTokens,

    /// The persisted token set carries no refresh token
    NoRefreshToken,

    /// The provider rejected the refresh token as expired; the caller must
    /// re-authenticate
    RefreshExpired,

    /// OAuth server returned an error
    Oauth(OAuthErrorResponse),

    /// Wire-protocol failure (transport, malformed response)
    Client(OAuthClientError),

    /// Session store failure
    Storage(StoreError),

    /// The operation was cancelled
    Cancelled,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTokens => write!(f, "no token set persisted (not authenticated)"),
            Self::NoRefreshToken => write!(f, "no refresh token available"),
            Self::RefreshExpired => {
                write!(f, "refresh token expired; re-authentication required")
            }
            Self::Oauth(e) => write!(f, "OAuth error: {e}"),
            Self::Client(e) => write!(f, "client error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for TokenError {}

impl From<OAuthClientError> for TokenError {
    fn from(err: OAuthClientError) -> Self {
        match err {
            OAuthClientError::Oauth(body) => Self::Oauth(body),
            other => Self::Client(other),
        }
    }
}

impl From<StoreError> for TokenError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err)
    }
}

/// Map a provider refresh error, promoting an expired refresh token to the
/// structural `RefreshExpired` signal callers react to.
fn map_refresh_error(body: OAuthErrorResponse) -> TokenError {
    let expired = body.error == "invalid_grant"
        && body
            .error_description
            .as_deref()
            .is_some_and(|desc| desc.to_ascii_lowercase().contains("expired"));

    if expired {
        warn!("refresh token expired; re-authentication required");
        TokenError::RefreshExpired
    } else {
        TokenError::Oauth(body)
    }
}

/// Token lifecycle service over one session.
///
/// Does not auto-clear the token set on any failure; clearing is the
/// session facade's decision.
pub struct TokenLifecycle {
    oauth: Arc<OAuthClient>,
    store: Arc<SecureSessionStore>,
    refresh_lock: Mutex<()>,
    refresh_epoch: AtomicU64,
}

impl TokenLifecycle {
    /// Create a lifecycle service over the given client and store.
    #[must_use]
    pub fn new(oauth: Arc<OAuthClient>, store: Arc<SecureSessionStore>) -> Self {
        Self {
            oauth,
            store,
            refresh_lock: Mutex::new(()),
            refresh_epoch: AtomicU64::new(0),
        }
    }

    /// Current token set, if any.
    ///
    /// # Errors
    /// Returns `TokenError::Storage` if the store fails.
    pub async fn tokens(&self) -> Result<Option<TokenSet>, TokenError> {
        Ok(self.store.load_tokens().await?)
    }

    /// Check whether the access token is expired within the given skew.
    ///
    /// # Errors
    /// Fails with `TokenError::NoTokens` when no token set is persisted.
    pub async fn is_access_token_expired(&self, skew_seconds: i64) -> Result<bool, TokenError> {
        let tokens = self
            .store
            .load_tokens()
            .await?
            .ok_or(TokenError::NoTokens)?;
        Ok(tokens.is_expired(skew_seconds))
    }

    /// Refresh the token set with the stored refresh token.
    ///
    /// At most one refresh request is in flight per session: a caller
    /// arriving while one is outstanding waits for it and receives the same
    /// resulting token set instead of issuing a duplicate request. On
    /// success the stored token set is replaced wholesale, carrying the
    /// previous refresh token forward when the response omits rotation.
    ///
    /// # Errors
    /// Fails with `TokenError::NoTokens` / `NoRefreshToken` when the session
    /// has nothing to refresh, `TokenError::RefreshExpired` when the
    /// provider rejects the refresh token as expired, or the underlying
    /// wire/storage error.
    pub async fn refresh(&self) -> Result<TokenSet, TokenError> {
        let epoch = self.refresh_epoch.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        if self.refresh_epoch.load(Ordering::Acquire) != epoch {
            // A refresh completed while this caller waited for the lock;
            // hand it the same result.
            debug!("coalescing onto a refresh that completed while waiting");
            return self
                .store
                .load_tokens()
                .await?
                .ok_or(TokenError::NoTokens);
        }

        let current = self
            .store
            .load_tokens()
            .await?
            .ok_or(TokenError::NoTokens)?;
        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or(TokenError::NoRefreshToken)?;

        let metadata = self.metadata().await?;
        let response = match self.oauth.refresh(&metadata, &refresh_token).await {
            Ok(response) => response,
            Err(OAuthClientError::Oauth(body)) => return Err(map_refresh_error(body)),
            Err(other) => return Err(TokenError::Client(other)),
        };

        let tokens = response.into_token_set(Some(refresh_token));
        self.store.save_tokens(&tokens).await?;
        self.refresh_epoch.fetch_add(1, Ordering::AcqRel);
        info!("access token refreshed");

        Ok(tokens)
    }

    /// Query the provider for a token's state. Stateless: the stored token
    /// set is not touched.
    ///
    /// # Errors
    /// Surfaces endpoint, wire, or storage errors.
    pub async fn introspect(
        &self,
        token: &str,
        hint: TokenTypeHint,
    ) -> Result<IntrospectionResult, TokenError> {
        let metadata = self.metadata().await?;
        self.oauth
            .introspect(&metadata, token, hint)
            .await
            .map_err(TokenError::from)
    }

    /// Revoke a token at the provider. Stateless: the stored token set is
    /// not cleared, so access- and refresh-token revocation can be called
    /// independently.
    ///
    /// # Errors
    /// Surfaces endpoint, wire, or storage errors.
    pub async fn revoke(&self, token: &str, hint: TokenTypeHint) -> Result<bool, TokenError> {
        let metadata = self.metadata().await?;
        self.oauth
            .revoke(&metadata, token, hint)
            .await
            .map_err(TokenError::from)
    }

    /// Fetch user claims from the userinfo endpoint with the stored access
    /// token.
    ///
    /// # Errors
    /// Fails with `TokenError::NoTokens` when not authenticated; otherwise
    /// surfaces endpoint or wire errors.
    pub async fn user_info(&self) -> Result<serde_json::Value, TokenError> {
        let tokens = self
            .store
            .load_tokens()
            .await?
            .ok_or(TokenError::NoTokens)?;
        let metadata = self.metadata().await?;
        self.oauth
            .user_info(&metadata, &tokens.access_token)
            .await
            .map_err(TokenError::from)
    }

    /// Clear the stored token set.
    ///
    /// # Errors
    /// Returns `TokenError::Storage` if the store fails.
    pub async fn clear(&self) -> Result<(), TokenError> {
        self.store.clear_tokens().await?;
        Ok(())
    }

    async fn metadata(&self) -> Result<ProviderMetadata, TokenError> {
        if let Some(metadata) = self.store.load_metadata().await? {
            return Ok(metadata);
        }
        let metadata = self.oauth.fetch_metadata().await?;
        self.store.save_metadata(&metadata).await?;
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for lifecycle.
    use super::*;
    use crate::config::ClientConfig;
    use crate::store::SecureSessionStore;
    use crate::testing::{MemoryStorage, MockTransport, PlaintextCipher};

    const DISCOVERY_URL: &str = "https://auth.example.com/.well-known/openid-configuration";
    const DISCOVERY_BODY: &str = r#"{
        "issuer": "https://auth.example.com",
        "authorization_endpoint": "https://auth.example.com/authorize",
        "token_endpoint": "https://auth.example.com/oauth/token",
        "introspection_endpoint": "https://auth.example.com/oauth/introspect",
        "revocation_endpoint": "https://auth.example.com/oauth/revoke"
    }"#;

    struct TestHarness {
        lifecycle: TokenLifecycle,
        store: Arc<SecureSessionStore>,
        transport: Arc<MockTransport>,
    }

    fn create_harness() -> TestHarness {
        let transport = Arc::new(MockTransport::new());
        transport.add_response(DISCOVERY_URL, 200, DISCOVERY_BODY);

        let config = ClientConfig::new(
            "https://auth.example.com",
            "test_client_id",
            "http://localhost:8888/callback",
            vec!["openid".to_string()],
        )
        .expect("valid config");

        let store = Arc::new(SecureSessionStore::new(
            Arc::new(MemoryStorage::new()),
            Arc::new(PlaintextCipher),
        ));
        let oauth = Arc::new(OAuthClient::new(config, transport.clone()));
        let lifecycle = TokenLifecycle::new(oauth, store.clone());

        TestHarness {
            lifecycle,
            store,
            transport,
        }
    }

    async fn store_tokens(harness: &TestHarness, refresh_token: Option<&str>) {
        let tokens = TokenSet::new(
            "AT1".to_string(),
            refresh_token.map(ToOwned::to_owned),
            None,
            3600,
            None,
        );
        harness.store.save_tokens(&tokens).await.expect("save");
    }

    /// Validates `TokenLifecycle::is_access_token_expired` behavior for the
    /// missing token scenario.
    ///
    /// Assertions:
    /// - Ensures the check fails with `TokenError::NoTokens` when nothing is
    ///   persisted.
    #[tokio::test]
    async fn test_expiry_check_requires_tokens() {
        let harness = create_harness();

        let result = harness.lifecycle.is_access_token_expired(0).await;
        assert!(matches!(result, Err(TokenError::NoTokens)));
    }

    /// Validates `TokenLifecycle::refresh` behavior for the missing refresh
    /// token scenario.
    ///
    /// Assertions:
    /// - Ensures refresh fails with `TokenError::NoRefreshToken` when the
    ///   token set has none.
    #[tokio::test]
    async fn test_refresh_requires_refresh_token() {
        let harness = create_harness();
        store_tokens(&harness, None).await;

        let result = harness.lifecycle.refresh().await;
        assert!(matches!(result, Err(TokenError::NoRefreshToken)));
    }

    /// Validates `TokenLifecycle::refresh` behavior for the wholesale
    /// replacement scenario.
    ///
    /// Assertions:
    /// - Confirms the stored token set carries the new access token.
    /// - Confirms the previous refresh token is retained when the response
    ///   omits rotation.
    #[tokio::test]
    async fn test_refresh_replaces_tokens_and_retains_refresh_token() {
        let harness = create_harness();
        store_tokens(&harness, Some("RT1")).await;
        harness.transport.add_response(
            "https://auth.example.com/oauth/token",
            200,
            r#"{"access_token":"AT2","token_type":"Bearer","expires_in":3600}"#,
        );

        let refreshed = harness.lifecycle.refresh().await.expect("refresh");
        assert_eq!(refreshed.access_token, "AT2");
        assert_eq!(refreshed.refresh_token, Some("RT1".to_string()));

        let stored = harness
            .store
            .load_tokens()
            .await
            .expect("load")
            .expect("tokens");
        assert_eq!(stored.access_token, "AT2");
        assert_eq!(stored.refresh_token, Some("RT1".to_string()));
    }

    /// Validates `TokenLifecycle::refresh` behavior for the expired refresh
    /// token scenario.
    ///
    /// Assertions:
    /// - Ensures the provider's `invalid_grant` + expiry description maps to
    ///   `TokenError::RefreshExpired`.
    /// - Ensures the stored token set is left unchanged (clearing is the
    ///   caller's responsibility).
    #[tokio::test]
    async fn test_refresh_expired_leaves_tokens_unchanged() {
        let harness = create_harness();
        store_tokens(&harness, Some("RT1")).await;
        harness.transport.add_response(
            "https://auth.example.com/oauth/token",
            400,
            r#"{"error":"invalid_grant","error_description":"refresh token expired"}"#,
        );

        let result = harness.lifecycle.refresh().await;
        assert!(matches!(result, Err(TokenError::RefreshExpired)));

        let stored = harness
            .store
            .load_tokens()
            .await
            .expect("load")
            .expect("tokens");
        assert_eq!(stored.access_token, "AT1");
        assert_eq!(stored.refresh_token, Some("RT1".to_string()));
    }

    /// Validates `map_refresh_error` behavior for the non-expiry
    /// `invalid_grant` scenario.
    ///
    /// Assertions:
    /// - Ensures an `invalid_grant` without an expiry description stays a
    ///   plain OAuth error.
    #[tokio::test]
    async fn test_refresh_invalid_grant_without_expiry() {
        let harness = create_harness();
        store_tokens(&harness, Some("RT1")).await;
        harness.transport.add_response(
            "https://auth.example.com/oauth/token",
            400,
            r#"{"error":"invalid_grant","error_description":"token revoked by administrator"}"#,
        );

        let result = harness.lifecycle.refresh().await;
        match result {
            Err(TokenError::Oauth(body)) => assert_eq!(body.error, "invalid_grant"),
            other => panic!("expected OAuth error, got {other:?}"),
        }
    }

    /// Validates `TokenLifecycle::refresh` behavior for the concurrent
    /// caller scenario.
    ///
    /// The token endpoint responds with a delay, so the second caller
    /// provably arrives while the first refresh is still outstanding.
    ///
    /// Assertions:
    /// - Ensures two concurrent refresh calls issue exactly one
    ///   token-endpoint request.
    /// - Confirms both callers receive the same resulting access token.
    #[tokio::test]
    async fn test_concurrent_refresh_coalesces() {
        let harness = create_harness();
        store_tokens(&harness, Some("RT1")).await;
        harness.transport.add_delayed_response(
            "https://auth.example.com/oauth/token",
            200,
            r#"{"access_token":"AT2","refresh_token":"RT2","token_type":"Bearer","expires_in":3600}"#,
            std::time::Duration::from_millis(100),
        );

        let (first, second) =
            tokio::join!(harness.lifecycle.refresh(), harness.lifecycle.refresh());
        let first = first.expect("refresh");
        let second = second.expect("refresh");

        assert_eq!(first.access_token, "AT2");
        assert_eq!(second.access_token, "AT2");
        assert_eq!(second.refresh_token, Some("RT2".to_string()));
        assert_eq!(
            harness
                .transport
                .request_count("https://auth.example.com/oauth/token"),
            1
        );
    }

    /// Validates `TokenLifecycle::introspect` behavior for the stateless
    /// call scenario.
    ///
    /// Assertions:
    /// - Confirms the parsed result carries `active == false`.
    /// - Ensures the stored token set is untouched.
    #[tokio::test]
    async fn test_introspect_is_stateless() {
        let harness = create_harness();
        store_tokens(&harness, Some("RT1")).await;
        harness.transport.add_response(
            "https://auth.example.com/oauth/introspect",
            200,
            r#"{"active":false}"#,
        );

        let result = harness
            .lifecycle
            .introspect("AT1", TokenTypeHint::AccessToken)
            .await
            .expect("introspect");
        assert!(!result.active);

        let stored = harness
            .store
            .load_tokens()
            .await
            .expect("load")
            .expect("tokens");
        assert_eq!(stored.access_token, "AT1");
    }

    /// Validates `TokenLifecycle::revoke` behavior for the independent
    /// revocation scenario.
    ///
    /// Assertions:
    /// - Confirms revocation succeeds.
    /// - Ensures the stored token set is not auto-cleared.
    #[tokio::test]
    async fn test_revoke_does_not_clear_tokens() {
        let harness = create_harness();
        store_tokens(&harness, Some("RT1")).await;
        harness
            .transport
            .add_response("https://auth.example.com/oauth/revoke", 200, "");

        let revoked = harness
            .lifecycle
            .revoke("AT1", TokenTypeHint::AccessToken)
            .await
            .expect("revoke");
        assert!(revoked);
        assert!(harness.store.load_tokens().await.expect("load").is_some());
    }
}
