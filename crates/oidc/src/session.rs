//! Post-authorization session facade
//!
//! The surface an application holds once authorization completed: token
//! access with auto-refresh, introspection, revocation, user info, and
//! sign-out-local. Network operations are routed through the
//! [`RequestDispatcher`] so they run off the caller's context and stay
//! cancellable.

use std::sync::Arc;

use tracing::{info, warn};

use crate::dispatch::{DispatchHandle, RequestDispatcher};
use crate::lifecycle::{TokenError, TokenLifecycle};
use crate::store::SecureSessionStore;
use crate::types::{IntrospectionResult, TokenSet, TokenTypeHint};

/// Default skew ahead of expiry at which `access_token` refreshes.
const DEFAULT_REFRESH_SKEW_SECONDS: i64 = 300;

/// Facade over the authorized session.
#[derive(Clone)]
pub struct SessionService {
    lifecycle: Arc<TokenLifecycle>,
    store: Arc<SecureSessionStore>,
    dispatcher: Arc<RequestDispatcher>,
    refresh_skew_seconds: i64,
}

impl SessionService {
    /// Create a session facade with the default refresh skew (5 minutes).
    #[must_use]
    pub fn new(
        lifecycle: Arc<TokenLifecycle>,
        store: Arc<SecureSessionStore>,
        dispatcher: Arc<RequestDispatcher>,
    ) -> Self {
        Self {
            lifecycle,
            store,
            dispatcher,
            refresh_skew_seconds: DEFAULT_REFRESH_SKEW_SECONDS,
        }
    }

    /// Override how long before nominal expiry `access_token` refreshes.
    #[must_use]
    pub fn with_refresh_skew(mut self, skew_seconds: i64) -> Self {
        self.refresh_skew_seconds = skew_seconds;
        self
    }

    /// Current token set, if any.
    ///
    /// # Errors
    /// Returns `TokenError::Storage` if the store fails.
    pub async fn tokens(&self) -> Result<Option<TokenSet>, TokenError> {
        self.lifecycle.tokens().await
    }

    /// Whether a token set is persisted.
    #[must_use]
    pub async fn is_authenticated(&self) -> bool {
        matches!(self.lifecycle.tokens().await, Ok(Some(_)))
    }

    /// Check whether the access token is expired within the given skew.
    ///
    /// # Errors
    /// Fails with `TokenError::NoTokens` when not authenticated.
    pub async fn is_access_token_expired(&self, skew_seconds: i64) -> Result<bool, TokenError> {
        self.lifecycle.is_access_token_expired(skew_seconds).await
    }

    /// Valid access token, refreshing first when it expires within the
    /// configured skew.
    ///
    /// # Errors
    /// Fails when not authenticated or when the refresh fails.
    pub async fn access_token(&self) -> Result<String, TokenError> {
        let tokens = self
            .lifecycle
            .tokens()
            .await?
            .ok_or(TokenError::NoTokens)?;

        if tokens.is_expired(self.refresh_skew_seconds) {
            let refreshed = self.refresh().await?;
            return Ok(refreshed.access_token);
        }
        Ok(tokens.access_token)
    }

    /// Refresh the token set.
    ///
    /// On `TokenError::RefreshExpired` the stored token set is cleared: the
    /// session cannot recover without re-authentication.
    ///
    /// # Errors
    /// Surfaces the lifecycle error; cancellation maps to
    /// `TokenError::Cancelled`.
    pub async fn refresh(&self) -> Result<TokenSet, TokenError> {
        self.dispatch_refresh()
            .outcome()
            .await
            .into_result(TokenError::Cancelled)
    }

    /// Dispatch a refresh and return the cancellable handle.
    #[must_use]
    pub fn dispatch_refresh(&self) -> DispatchHandle<TokenSet, TokenError> {
        let lifecycle = self.lifecycle.clone();
        let store = self.store.clone();

        self.dispatcher.dispatch(async move {
            match lifecycle.refresh().await {
                Err(TokenError::RefreshExpired) => {
                    info!("clearing session after refresh expiry");
                    if let Err(err) = store.clear_tokens().await {
                        warn!(error = %err, "failed to clear token set after refresh expiry");
                    }
                    Err(TokenError::RefreshExpired)
                }
                other => other,
            }
        })
    }

    /// Query the provider for a token's state.
    ///
    /// # Errors
    /// Surfaces the lifecycle error; cancellation maps to
    /// `TokenError::Cancelled`.
    pub async fn introspect(
        &self,
        token: &str,
        hint: TokenTypeHint,
    ) -> Result<IntrospectionResult, TokenError> {
        let lifecycle = self.lifecycle.clone();
        let token = token.to_string();

        self.dispatcher
            .dispatch(async move { lifecycle.introspect(&token, hint).await })
            .outcome()
            .await
            .into_result(TokenError::Cancelled)
    }

    /// Revoke a token at the provider. The local token set is not cleared;
    /// call [`Self::clear`] separately when desired.
    ///
    /// # Errors
    /// Surfaces the lifecycle error; cancellation maps to
    /// `TokenError::Cancelled`.
    pub async fn revoke(&self, token: &str, hint: TokenTypeHint) -> Result<bool, TokenError> {
        let lifecycle = self.lifecycle.clone();
        let token = token.to_string();

        self.dispatcher
            .dispatch(async move { lifecycle.revoke(&token, hint).await })
            .outcome()
            .await
            .into_result(TokenError::Cancelled)
    }

    /// Fetch user claims with the stored access token.
    ///
    /// # Errors
    /// Surfaces the lifecycle error; cancellation maps to
    /// `TokenError::Cancelled`.
    pub async fn user_info(&self) -> Result<serde_json::Value, TokenError> {
        let lifecycle = self.lifecycle.clone();

        self.dispatcher
            .dispatch(async move { lifecycle.user_info().await })
            .outcome()
            .await
            .into_result(TokenError::Cancelled)
    }

    /// Clear the stored token set (local sign-out).
    ///
    /// # Errors
    /// Returns `TokenError::Storage` if the store fails.
    pub async fn clear(&self) -> Result<(), TokenError> {
        self.lifecycle.clear().await
    }
}
