//! End-to-end authentication service
//!
//! The composition-root facade: wires the wire-protocol client, session
//! store, flow state machine, token lifecycle, and dispatcher from the
//! injected collaborators, drives sign-in end to end through the external
//! redirect collaborator, and exposes the resulting [`SessionService`].
//!
//! There is no ambient global: the application owns the service instance
//! and passes it (or its session facade) where needed.

use std::sync::Arc;

use tracing::debug;

use crate::client::OAuthClient;
use crate::config::ClientConfig;
use crate::crypto::SessionCipher;
use crate::dispatch::{DispatchHandle, RequestDispatcher};
use crate::flow::{
    AuthorizationFlow, AuthorizationPayload, FlowError, FlowState, RedirectLauncher,
    RedirectResult,
};
use crate::http::HttpTransport;
use crate::lifecycle::TokenLifecycle;
use crate::session::SessionService;
use crate::store::{SecureSessionStore, StorageBackend};
use crate::types::TokenSet;

/// High-level service driving authorization and exposing the session.
pub struct AuthService {
    flow: Arc<AuthorizationFlow>,
    launcher: Arc<dyn RedirectLauncher>,
    dispatcher: Arc<RequestDispatcher>,
    session: SessionService,
}

impl AuthService {
    /// Compose a service from its collaborator seams.
    ///
    /// # Arguments
    /// * `config` - Validated client registration
    /// * `transport` - HTTP transport implementation
    /// * `backend` - Byte-oriented storage for encrypted session entries
    /// * `cipher` - Session-state cipher (platform key storage adapter)
    /// * `launcher` - External redirect collaborator
    #[must_use]
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        backend: Arc<dyn StorageBackend>,
        cipher: Arc<dyn SessionCipher>,
        launcher: Arc<dyn RedirectLauncher>,
    ) -> Self {
        let store = Arc::new(SecureSessionStore::new(backend, cipher));
        let oauth = Arc::new(OAuthClient::new(config, transport));
        let flow = Arc::new(AuthorizationFlow::new(oauth.clone(), store.clone()));
        let lifecycle = Arc::new(TokenLifecycle::new(oauth, store.clone()));
        let dispatcher = Arc::new(RequestDispatcher::new());
        let session = SessionService::new(lifecycle, store, dispatcher.clone());

        Self {
            flow,
            launcher,
            dispatcher,
            session,
        }
    }

    /// Restore persisted flow state. Call once at startup; a pending
    /// authorization request survives process teardown and resumes from
    /// here.
    ///
    /// # Errors
    /// Returns `FlowError::Storage` if the store fails.
    pub async fn restore(&self) -> Result<FlowState, FlowError> {
        self.flow.restore().await
    }

    /// Drive a full sign-in: build the request, hand the authorization URL
    /// to the redirect collaborator, and resume with its result.
    ///
    /// # Errors
    /// Surfaces flow errors; cancellation maps to `FlowError::Cancelled`.
    pub async fn sign_in(
        &self,
        payload: Option<AuthorizationPayload>,
    ) -> Result<TokenSet, FlowError> {
        self.dispatch_sign_in(payload)
            .outcome()
            .await
            .into_result(FlowError::Cancelled)
    }

    /// Dispatch a full sign-in and return the cancellable handle.
    #[must_use]
    pub fn dispatch_sign_in(
        &self,
        payload: Option<AuthorizationPayload>,
    ) -> DispatchHandle<TokenSet, FlowError> {
        let flow = self.flow.clone();
        let launcher = self.launcher.clone();

        self.dispatcher.dispatch(async move {
            let (url, _state) = flow.start(payload).await?;
            let cancel = flow.cancellation_token();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("sign-in cancelled while awaiting the redirect");
                    return Err(FlowError::Cancelled);
                }
                result = launcher.launch(&url) => result,
            };

            flow.resume(result).await
        })
    }

    /// Resume an authorization attempt with an externally received redirect
    /// result (e.g. after a process restart followed by [`Self::restore`]).
    ///
    /// # Errors
    /// Surfaces flow validation and exchange errors.
    pub async fn resume(&self, result: RedirectResult) -> Result<TokenSet, FlowError> {
        self.flow.resume(result).await
    }

    /// Cancel the in-flight authorization attempt, if any.
    pub fn cancel(&self) {
        self.flow.cancel();
    }

    /// Whether an authorization attempt is currently in flight.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.flow.is_in_progress()
    }

    /// Current flow state.
    #[must_use]
    pub fn flow_state(&self) -> FlowState {
        self.flow.state()
    }

    /// Clear the session and transition to `SignedOut`. Browser-side logout
    /// is layered on top via [`Self::end_session_url`].
    ///
    /// # Errors
    /// Returns `FlowError::Storage` if the store fails.
    pub async fn sign_out(&self) -> Result<(), FlowError> {
        self.flow.sign_out().await
    }

    /// Build the provider logout URL for the current session.
    ///
    /// # Errors
    /// Fails if the provider publishes no end-session endpoint.
    pub async fn end_session_url(
        &self,
        post_logout_redirect_uri: Option<&str>,
    ) -> Result<String, FlowError> {
        self.flow.end_session_url(post_logout_redirect_uri).await
    }

    /// Drop the cached provider metadata.
    ///
    /// # Errors
    /// Returns `FlowError::Storage` if the store fails.
    pub async fn invalidate_metadata(&self) -> Result<(), FlowError> {
        self.flow.invalidate_metadata().await
    }

    /// Session facade for token lifecycle operations.
    #[must_use]
    pub fn session(&self) -> &SessionService {
        &self.session
    }

    /// Cancel everything dispatched from this service.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("flow_state", &self.flow.state())
            .finish()
    }
}
