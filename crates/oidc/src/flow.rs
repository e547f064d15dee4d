//! Authorization-code flow state machine
//!
//! Carries a sign-in across the external-browser redirect boundary. The
//! in-flight [`AuthorizationRequest`] is persisted before the redirect and
//! consumed exactly once when the redirect returns, so a flow resumes
//! deterministically in a fresh process with no in-memory continuation
//! state.
//!
//! State transitions are strictly sequential:
//!
//! ```text
//! Idle → FetchingMetadata → BuildingRequest → AwaitingRedirect
//!      → ExchangingCode → Authorized | Cancelled | Failed
//! ```
//!
//! plus the re-entrant terminals `SignedOut` and `ReauthRequired`, from
//! which a new `start` is permitted.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{OAuthClient, OAuthClientError};
use crate::metadata::ProviderMetadata;
use crate::pkce::{self, PkceParams};
use crate::store::{SecureSessionStore, StoreError};
use crate::types::{OAuthErrorResponse, TokenSet};

/// States of the authorization flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    FetchingMetadata,
    BuildingRequest,
    AwaitingRedirect,
    ExchangingCode,
    Authorized,
    Cancelled,
    Failed,
    SignedOut,
    ReauthRequired,
}

impl FlowState {
    /// Whether a new `start` is permitted from this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Authorized | Self::Cancelled | Self::Failed | Self::SignedOut | Self::ReauthRequired
        )
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::FetchingMetadata => "fetching_metadata",
            Self::BuildingRequest => "building_request",
            Self::AwaitingRedirect => "awaiting_redirect",
            Self::ExchangingCode => "exchanging_code",
            Self::Authorized => "authorized",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::SignedOut => "signed_out",
            Self::ReauthRequired => "reauth_required",
        };
        f.write_str(name)
    }
}

/// One in-flight authorization attempt
///
/// Persisted before the redirect boundary so it survives process teardown;
/// consumed (deleted) exactly once on successful or failed resume. At most
/// one request is persisted at a time: starting a new flow replaces any
/// prior incomplete one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// PKCE verifier, kept secret until the token exchange.
    pub code_verifier: String,
    /// PKCE challenge sent in the authorization URL.
    pub code_challenge: String,
    /// Anti-CSRF correlation token; single-use.
    pub state: String,
    /// Anti-replay value validated against the issued ID token; single-use.
    pub nonce: String,
    /// Requested scopes, configured plus caller-supplied.
    pub scopes: Vec<String>,
    /// Caller-supplied extra authorize parameters.
    pub extra_params: Vec<(String, String)>,
    /// Creation timestamp, used for the optional staleness bound.
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied additions merged into an authorization request.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationPayload {
    /// Pre-fills the provider's login form.
    pub login_hint: Option<String>,
    /// Scopes requested on top of the configured ones.
    pub extra_scopes: Vec<String>,
    /// Additional authorize query parameters.
    pub extra_params: Vec<(String, String)>,
}

/// Result delivered by the external redirect collaborator.
#[derive(Debug, Clone)]
pub enum RedirectResult {
    /// The user authorized; carries the code and round-tripped state.
    Authorized { code: String, state: String },
    /// The provider returned an error.
    Error {
        error: String,
        error_description: Option<String>,
        state: Option<String>,
    },
    /// The user dismissed the browser without completing authorization.
    Cancelled,
}

/// External collaborator that drives the user through the provider's
/// authorization page (system browser, custom tab, webview).
///
/// The launch spans a process-lifetime boundary: the engine never assumes
/// the launching process is still alive when the redirect returns.
#[async_trait]
pub trait RedirectLauncher: Send + Sync {
    /// Present the authorization URL and await the redirect result.
    async fn launch(&self, authorization_url: &str) -> RedirectResult;
}

/// Error type for flow operations
#[derive(Debug)]
pub enum FlowError {
    /// A flow is already past `Idle` and not yet terminal
    AlreadyInProgress,

    /// `resume` was called outside `AwaitingRedirect`
    NotAwaitingRedirect,

    /// No persisted authorization request exists to resume
    NoPendingRequest,

    /// State parameter mismatch (possible CSRF); the pending request is
    /// discarded
    StateMismatch { expected: String, received: String },

    /// ID-token nonce did not match the persisted nonce; nothing was stored
    NonceMismatch,

    /// The persisted request exceeded the configured TTL
    StaleRequest,

    /// OAuth server returned an error
    Oauth(OAuthErrorResponse),

    /// Wire-protocol failure (transport, malformed response)
    Client(OAuthClientError),

    /// Session store failure
    Storage(StoreError),

    /// The flow was cancelled
    Cancelled,
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInProgress => write!(f, "authorization flow already in progress"),
            Self::NotAwaitingRedirect => write!(f, "flow is not awaiting a redirect"),
            Self::NoPendingRequest => write!(f, "no persisted authorization request to resume"),
            Self::StateMismatch { expected, received } => {
                write!(f, "state mismatch (CSRF): expected {expected}, received {received}")
            }
            Self::NonceMismatch => write!(f, "id_token nonce mismatch"),
            Self::StaleRequest => write!(f, "persisted authorization request is too old"),
            Self::Oauth(e) => write!(f, "OAuth error: {e}"),
            Self::Client(e) => write!(f, "client error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Cancelled => write!(f, "authorization cancelled"),
        }
    }
}

impl std::error::Error for FlowError {}

impl From<OAuthClientError> for FlowError {
    fn from(err: OAuthClientError) -> Self {
        match err {
            OAuthClientError::Oauth(body) => Self::Oauth(body),
            other => Self::Client(other),
        }
    }
}

impl From<StoreError> for FlowError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err)
    }
}

/// Redirect errors that mean the user must authenticate again rather than
/// that the flow failed outright.
fn requires_reauthentication(error: &str) -> bool {
    matches!(
        error,
        "login_required" | "interaction_required" | "consent_required" | "account_selection_required"
    )
}

/// Extract the `nonce` claim from an ID token without verifying the
/// signature (key resolution is a delegated concern).
fn id_token_nonce(id_token: &str) -> Result<Option<String>, FlowError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| protocol_error("id_token is not a JWT"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| protocol_error("id_token payload is not base64url"))?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|_| protocol_error("id_token payload is not JSON"))?;

    Ok(claims
        .get("nonce")
        .and_then(|value| value.as_str())
        .map(ToOwned::to_owned))
}

fn protocol_error(message: &str) -> FlowError {
    FlowError::Client(OAuthClientError::Protocol(message.to_string()))
}

/// Authorization-code-with-PKCE state machine.
pub struct AuthorizationFlow {
    oauth: Arc<OAuthClient>,
    store: Arc<SecureSessionStore>,
    state: Mutex<FlowState>,
    cancel_token: Mutex<CancellationToken>,
}

impl AuthorizationFlow {
    /// Create a flow in `Idle` over the given client and store.
    #[must_use]
    pub fn new(oauth: Arc<OAuthClient>, store: Arc<SecureSessionStore>) -> Self {
        Self {
            oauth,
            store,
            state: Mutex::new(FlowState::Idle),
            cancel_token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Current flow state.
    #[must_use]
    pub fn state(&self) -> FlowState {
        *self.state.lock()
    }

    /// Whether a flow is currently between `start` and its terminal state.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        let state = self.state();
        state != FlowState::Idle && !state.is_terminal()
    }

    /// Token cancelled when the current attempt is cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.lock().clone()
    }

    /// Restore flow state from persisted session data.
    ///
    /// Call once at startup: a persisted pending request puts the machine
    /// into `AwaitingRedirect` (the redirect may arrive in this process
    /// life), a persisted token set into `Authorized`.
    ///
    /// # Errors
    /// Returns `FlowError::Storage` if the store fails.
    pub async fn restore(&self) -> Result<FlowState, FlowError> {
        if self.store.load_pending_request().await?.is_some() {
            let mut state = self.state.lock();
            if *state == FlowState::Idle {
                *state = FlowState::AwaitingRedirect;
                info!("restored persisted authorization request; awaiting redirect");
            }
        } else if self.store.load_tokens().await?.is_some() {
            let mut state = self.state.lock();
            if *state == FlowState::Idle {
                *state = FlowState::Authorized;
                debug!("restored authorized session");
            }
        }
        Ok(self.state())
    }

    /// Start a sign-in attempt.
    ///
    /// Builds and persists an [`AuthorizationRequest`] (replacing any prior
    /// incomplete one), transitions to `AwaitingRedirect`, and returns the
    /// authorization URL for the external redirect collaborator together
    /// with the request's `state`.
    ///
    /// # Errors
    /// Fails with `FlowError::AlreadyInProgress` unless the flow is `Idle`
    /// or terminal; otherwise surfaces discovery, storage, or cancellation
    /// errors.
    pub async fn start(
        &self,
        payload: Option<AuthorizationPayload>,
    ) -> Result<(String, String), FlowError> {
        let token = {
            let mut state = self.state.lock();
            if *state != FlowState::Idle && !state.is_terminal() {
                return Err(FlowError::AlreadyInProgress);
            }
            *state = FlowState::FetchingMetadata;

            let fresh = CancellationToken::new();
            *self.cancel_token.lock() = fresh.clone();
            fresh
        };

        let result = self.start_inner(payload, &token).await;
        match &result {
            Ok(_) => {}
            Err(FlowError::Cancelled) => self.transition(FlowState::Cancelled),
            Err(_) => self.transition(FlowState::Failed),
        }
        result
    }

    async fn start_inner(
        &self,
        payload: Option<AuthorizationPayload>,
        token: &CancellationToken,
    ) -> Result<(String, String), FlowError> {
        let metadata = self.cached_or_fetched_metadata(token).await?;
        self.transition(FlowState::BuildingRequest);

        let pkce = PkceParams::generate();
        let state_token = pkce::generate_state();
        let nonce = pkce::generate_nonce();

        let payload = payload.unwrap_or_default();
        let mut scopes = self.oauth.config().scopes.clone();
        for scope in payload.extra_scopes {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        let mut extra_params = payload.extra_params;
        if let Some(login_hint) = payload.login_hint {
            extra_params.push(("login_hint".to_string(), login_hint));
        }

        let request = AuthorizationRequest {
            code_verifier: pkce.verifier,
            code_challenge: pkce.challenge,
            state: state_token.clone(),
            nonce,
            scopes,
            extra_params,
            created_at: Utc::now(),
        };

        // Persisted before the redirect boundary: the exchange must be able
        // to resume from storage alone.
        self.store.save_pending_request(&request).await?;

        let url = self.oauth.build_authorization_url(&metadata, &request);
        self.transition(FlowState::AwaitingRedirect);
        info!("authorization request persisted; awaiting redirect");

        Ok((url, state_token))
    }

    async fn cached_or_fetched_metadata(
        &self,
        token: &CancellationToken,
    ) -> Result<ProviderMetadata, FlowError> {
        if let Some(metadata) = self.store.load_metadata().await? {
            debug!("using cached provider metadata");
            return Ok(metadata);
        }

        let metadata = self
            .cancellable(token, self.oauth.fetch_metadata())
            .await??;
        self.store.save_metadata(&metadata).await?;
        info!("provider metadata fetched and cached");
        Ok(metadata)
    }

    /// Resume the flow with the redirect collaborator's result.
    ///
    /// The persisted request is consumed exactly once: on state mismatch,
    /// staleness, cancellation, provider error, or a completed exchange it
    /// is discarded.
    ///
    /// # Errors
    /// Rejected with `FlowError::NotAwaitingRedirect` outside
    /// `AwaitingRedirect`; otherwise surfaces validation, exchange, or
    /// storage errors.
    pub async fn resume(&self, result: RedirectResult) -> Result<TokenSet, FlowError> {
        let token = {
            let mut state = self.state.lock();
            if *state != FlowState::AwaitingRedirect {
                return Err(FlowError::NotAwaitingRedirect);
            }
            *state = FlowState::ExchangingCode;

            let fresh = CancellationToken::new();
            *self.cancel_token.lock() = fresh.clone();
            fresh
        };

        let outcome = self.resume_inner(result, &token).await;
        match &outcome {
            Ok(_) => self.transition(FlowState::Authorized),
            Err(FlowError::Cancelled) => self.transition(FlowState::Cancelled),
            Err(FlowError::Oauth(body)) if requires_reauthentication(&body.error) => {
                self.transition(FlowState::ReauthRequired);
            }
            Err(_) => self.transition(FlowState::Failed),
        }
        outcome
    }

    async fn resume_inner(
        &self,
        result: RedirectResult,
        token: &CancellationToken,
    ) -> Result<TokenSet, FlowError> {
        let Some(pending) = self.store.load_pending_request().await? else {
            return Err(FlowError::NoPendingRequest);
        };

        match result {
            RedirectResult::Cancelled => {
                self.store.clear_pending_request().await?;
                info!("authorization cancelled at the redirect");
                Err(FlowError::Cancelled)
            }
            RedirectResult::Error {
                error,
                error_description,
                state,
            } => {
                if let Some(received) = state {
                    if received != pending.state {
                        self.store.clear_pending_request().await?;
                        warn!("state mismatch on error redirect; pending request discarded");
                        return Err(FlowError::StateMismatch {
                            expected: pending.state,
                            received,
                        });
                    }
                }
                self.store.clear_pending_request().await?;
                warn!(error = %error, "authorization redirect returned an error");
                Err(FlowError::Oauth(OAuthErrorResponse {
                    error,
                    error_description,
                }))
            }
            RedirectResult::Authorized { code, state } => {
                if state != pending.state {
                    // Anti-replay: a mismatched redirect burns the pending
                    // request.
                    self.store.clear_pending_request().await?;
                    warn!("state mismatch on redirect; pending request discarded");
                    return Err(FlowError::StateMismatch {
                        expected: pending.state,
                        received: state,
                    });
                }

                if self.is_stale(&pending) {
                    self.store.clear_pending_request().await?;
                    warn!("persisted authorization request exceeded its TTL");
                    return Err(FlowError::StaleRequest);
                }

                self.exchange(&pending, &code, token).await
            }
        }
    }

    async fn exchange(
        &self,
        pending: &AuthorizationRequest,
        code: &str,
        token: &CancellationToken,
    ) -> Result<TokenSet, FlowError> {
        let metadata = self.cached_or_fetched_metadata(token).await?;

        let exchanged = self
            .cancellable(
                token,
                self.oauth.exchange_code(&metadata, code, &pending.code_verifier),
            )
            .await;
        let response = match exchanged {
            Err(cancelled) => {
                let _ = self.store.clear_pending_request().await;
                return Err(cancelled);
            }
            Ok(Err(err)) => {
                // Authorization codes are single-use; a failed exchange
                // burns the request.
                self.store.clear_pending_request().await?;
                return Err(err.into());
            }
            Ok(Ok(response)) => response,
        };

        // The nonce must round-trip through the ID token before anything is
        // persisted.
        if let Some(id_token) = response.id_token.as_deref() {
            let nonce = match id_token_nonce(id_token) {
                Ok(nonce) => nonce,
                Err(err) => {
                    self.store.clear_pending_request().await?;
                    return Err(err);
                }
            };
            if nonce.as_deref() != Some(pending.nonce.as_str()) {
                self.store.clear_pending_request().await?;
                warn!("id_token nonce mismatch; token set rejected");
                return Err(FlowError::NonceMismatch);
            }
        }

        let tokens = response.into_token_set(None);
        self.store.save_tokens(&tokens).await?;
        self.store.clear_pending_request().await?;
        info!("authorization complete; token set persisted");

        Ok(tokens)
    }

    /// Cancel the current attempt from any non-terminal state.
    ///
    /// Cooperative: an in-flight network operation observes the token and
    /// aborts; an already-delivered result stands.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return;
        }
        self.cancel_token.lock().cancel();
        debug!(from = %*state, "flow cancelled");
        *state = FlowState::Cancelled;
    }

    /// Clear the session and transition to `SignedOut`.
    ///
    /// Clears the token set and any pending request. Browser-side logout is
    /// a separate redirect operation built with [`Self::end_session_url`].
    ///
    /// # Errors
    /// Returns `FlowError::Storage` if the store fails.
    pub async fn sign_out(&self) -> Result<(), FlowError> {
        self.store.clear_tokens().await?;
        self.store.clear_pending_request().await?;
        self.transition(FlowState::SignedOut);
        info!("session cleared; signed out");
        Ok(())
    }

    /// Drop the cached provider metadata so the next flow re-discovers.
    ///
    /// # Errors
    /// Returns `FlowError::Storage` if the store fails.
    pub async fn invalidate_metadata(&self) -> Result<(), FlowError> {
        self.store.clear_metadata().await?;
        Ok(())
    }

    /// Build the RP-initiated logout URL for the current session.
    ///
    /// # Errors
    /// Fails if no metadata is available or the provider publishes no
    /// end-session endpoint.
    pub async fn end_session_url(
        &self,
        post_logout_redirect_uri: Option<&str>,
    ) -> Result<String, FlowError> {
        let metadata = match self.store.load_metadata().await? {
            Some(metadata) => metadata,
            None => self.oauth.fetch_metadata().await?,
        };
        let id_token = self.store.load_tokens().await?.and_then(|tokens| tokens.id_token);
        let state = pkce::generate_state();

        Ok(self.oauth.build_end_session_url(
            &metadata,
            id_token.as_deref(),
            post_logout_redirect_uri,
            &state,
        )?)
    }

    /// Race a unit of work against the attempt's cancellation token.
    async fn cancellable<T, E>(
        &self,
        token: &CancellationToken,
        work: impl std::future::Future<Output = Result<T, E>>,
    ) -> Result<Result<T, E>, FlowError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(FlowError::Cancelled),
            result = work => Ok(result),
        }
    }

    fn is_stale(&self, pending: &AuthorizationRequest) -> bool {
        let Some(ttl) = self.oauth.config().request_ttl else {
            return false;
        };
        let age_seconds = (Utc::now() - pending.created_at).num_seconds().max(0) as u64;
        age_seconds > ttl.as_secs()
    }

    fn transition(&self, next: FlowState) {
        let mut state = self.state.lock();
        debug!(from = %*state, to = %next, "flow transition");
        *state = next;
    }
}
