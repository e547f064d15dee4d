//! OAuth 2.0 / OIDC wire-protocol client
//!
//! Talks the standard endpoints through the injected [`HttpTransport`]:
//! discovery, authorization URL construction, code exchange, refresh,
//! introspection, revocation, and user info. Implements RFC 6749 (OAuth
//! 2.0), RFC 7636 (PKCE), RFC 7662 (introspection) and RFC 7009
//! (revocation) for public clients; no client secret is ever sent.

use std::sync::Arc;

use tracing::debug;

use crate::config::ClientConfig;
use crate::flow::AuthorizationRequest;
use crate::http::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::metadata::ProviderMetadata;
use crate::types::{IntrospectionResult, OAuthErrorResponse, TokenResponse, TokenTypeHint};

/// Error type for wire-protocol operations
#[derive(Debug)]
pub enum OAuthClientError {
    /// Transport failure or timeout
    Transport(TransportError),

    /// OAuth server returned an error body
    Oauth(OAuthErrorResponse),

    /// Response was malformed or had an unexpected status
    Protocol(String),

    /// The provider does not publish the endpoint required for this
    /// operation
    MissingEndpoint(&'static str),

    /// Discovery document was issued by a different issuer
    IssuerMismatch { expected: String, received: String },
}

impl std::fmt::Display for OAuthClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Oauth(e) => write!(f, "OAuth error: {e}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::MissingEndpoint(endpoint) => {
                write!(f, "provider does not publish {endpoint}")
            }
            Self::IssuerMismatch { expected, received } => {
                write!(f, "issuer mismatch: expected {expected}, received {received}")
            }
        }
    }
}

impl std::error::Error for OAuthClientError {}

impl From<TransportError> for OAuthClientError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

/// Wire-protocol client for one configured OAuth provider.
#[derive(Clone)]
pub struct OAuthClient {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient").field("config", &self.config).finish()
    }
}

impl OAuthClient {
    /// Create a client for the given registration and transport.
    #[must_use]
    pub fn new(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    /// Get a reference to the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fetch and validate the provider's discovery document.
    ///
    /// # Errors
    /// Returns error on transport failure, malformed document, or an issuer
    /// that does not match the configured one.
    pub async fn fetch_metadata(&self) -> Result<ProviderMetadata, OAuthClientError> {
        debug!(url = %self.config.discovery_uri, "fetching provider metadata");

        let response = self
            .transport
            .send(HttpRequest::get(&self.config.discovery_uri))
            .await?;
        if !response.is_success() {
            return Err(OAuthClientError::Protocol(format!(
                "discovery request returned status {}",
                response.status
            )));
        }

        let metadata: ProviderMetadata = response
            .json()
            .map_err(|e| OAuthClientError::Protocol(format!("malformed discovery document: {e}")))?;

        if !metadata.issuer_matches(&self.config.issuer) {
            return Err(OAuthClientError::IssuerMismatch {
                expected: self.config.issuer.clone(),
                received: metadata.issuer,
            });
        }

        Ok(metadata)
    }

    /// Build the authorization URL for a persisted request.
    ///
    /// The URL carries the standard code-flow parameters plus the request's
    /// PKCE challenge, state and nonce, and any caller-supplied extras.
    #[must_use]
    pub fn build_authorization_url(
        &self,
        metadata: &ProviderMetadata,
        request: &AuthorizationRequest,
    ) -> String {
        let scope_string = request.scopes.join(" ");

        let mut params: Vec<(String, String)> = vec![
            ("response_type".to_string(), "code".to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("redirect_uri".to_string(), self.config.redirect_uri.clone()),
            ("scope".to_string(), scope_string),
            ("state".to_string(), request.state.clone()),
            ("nonce".to_string(), request.nonce.clone()),
            ("code_challenge".to_string(), request.code_challenge.clone()),
            ("code_challenge_method".to_string(), "S256".to_string()),
        ];
        params.extend(request.extra_params.iter().cloned());

        format!(
            "{}?{}",
            metadata.authorization_endpoint,
            encode_query(&params)
        )
    }

    /// Build the RP-initiated logout URL.
    ///
    /// # Errors
    /// Returns `MissingEndpoint` if the provider publishes no end-session
    /// endpoint.
    pub fn build_end_session_url(
        &self,
        metadata: &ProviderMetadata,
        id_token_hint: Option<&str>,
        post_logout_redirect_uri: Option<&str>,
        state: &str,
    ) -> Result<String, OAuthClientError> {
        let endpoint = metadata
            .end_session_endpoint
            .as_deref()
            .ok_or(OAuthClientError::MissingEndpoint("end_session_endpoint"))?;

        let mut params: Vec<(String, String)> = vec![("state".to_string(), state.to_string())];
        if let Some(hint) = id_token_hint {
            params.push(("id_token_hint".to_string(), hint.to_string()));
        }
        if let Some(uri) = post_logout_redirect_uri {
            params.push(("post_logout_redirect_uri".to_string(), uri.to_string()));
        }

        Ok(format!("{}?{}", endpoint, encode_query(&params)))
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Arguments
    /// * `code` - Authorization code from the redirect
    /// * `code_verifier` - PKCE verifier persisted when the request was built
    ///
    /// # Errors
    /// Returns error on transport failure, provider error body, or
    /// unparseable response.
    pub async fn exchange_code(
        &self,
        metadata: &ProviderMetadata,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, OAuthClientError> {
        debug!("exchanging authorization code");
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];
        self.token_request(&metadata.token_endpoint, &params).await
    }

    /// Obtain a fresh token set with a refresh token.
    ///
    /// # Errors
    /// Returns error on transport failure, provider error body, or
    /// unparseable response.
    pub async fn refresh(
        &self,
        metadata: &ProviderMetadata,
        refresh_token: &str,
    ) -> Result<TokenResponse, OAuthClientError> {
        debug!("refreshing access token");
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        self.token_request(&metadata.token_endpoint, &params).await
    }

    async fn token_request(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, OAuthClientError> {
        let response = self
            .transport
            .send(HttpRequest::post(endpoint).form_body(params))
            .await?;

        if !response.is_success() {
            return Err(oauth_error(&response));
        }

        response
            .json()
            .map_err(|e| OAuthClientError::Protocol(format!("malformed token response: {e}")))
    }

    /// Query the introspection endpoint for a token's state.
    ///
    /// # Errors
    /// Returns error if the provider publishes no introspection endpoint or
    /// the call fails.
    pub async fn introspect(
        &self,
        metadata: &ProviderMetadata,
        token: &str,
        hint: TokenTypeHint,
    ) -> Result<IntrospectionResult, OAuthClientError> {
        let endpoint = metadata
            .introspection_endpoint
            .as_deref()
            .ok_or(OAuthClientError::MissingEndpoint("introspection_endpoint"))?;

        debug!(hint = %hint, "introspecting token");
        let params = [
            ("token", token),
            ("token_type_hint", hint.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        let response = self
            .transport
            .send(HttpRequest::post(endpoint).form_body(&params))
            .await?;

        if !response.is_success() {
            return Err(oauth_error(&response));
        }

        response.json().map_err(|e| {
            OAuthClientError::Protocol(format!("malformed introspection response: {e}"))
        })
    }

    /// Revoke a token at the revocation endpoint.
    ///
    /// Any 2xx response counts as success. The stored token set is not
    /// touched; access- and refresh-token revocation stay independently
    /// callable.
    ///
    /// # Errors
    /// Returns error if the provider publishes no revocation endpoint or the
    /// call fails.
    pub async fn revoke(
        &self,
        metadata: &ProviderMetadata,
        token: &str,
        hint: TokenTypeHint,
    ) -> Result<bool, OAuthClientError> {
        let endpoint = metadata
            .revocation_endpoint
            .as_deref()
            .ok_or(OAuthClientError::MissingEndpoint("revocation_endpoint"))?;

        debug!(hint = %hint, "revoking token");
        let params = [
            ("token", token),
            ("token_type_hint", hint.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        let response = self
            .transport
            .send(HttpRequest::post(endpoint).form_body(&params))
            .await?;

        if !response.is_success() {
            return Err(oauth_error(&response));
        }
        Ok(true)
    }

    /// Fetch user claims from the userinfo endpoint.
    ///
    /// # Errors
    /// Returns error if the provider publishes no userinfo endpoint or the
    /// call fails.
    pub async fn user_info(
        &self,
        metadata: &ProviderMetadata,
        access_token: &str,
    ) -> Result<serde_json::Value, OAuthClientError> {
        let endpoint = metadata
            .userinfo_endpoint
            .as_deref()
            .ok_or(OAuthClientError::MissingEndpoint("userinfo_endpoint"))?;

        let response = self
            .transport
            .send(
                HttpRequest::get(endpoint)
                    .header("authorization", format!("Bearer {access_token}")),
            )
            .await?;

        if !response.is_success() {
            return Err(oauth_error(&response));
        }

        response
            .json()
            .map_err(|e| OAuthClientError::Protocol(format!("malformed userinfo response: {e}")))
    }
}

fn oauth_error(response: &HttpResponse) -> OAuthClientError {
    match response.json::<OAuthErrorResponse>() {
        Ok(body) => OAuthClientError::Oauth(body),
        Err(_) => OAuthClientError::Protocol(format!(
            "endpoint returned status {} with an unparseable body",
            response.status
        )),
    }
}

fn encode_query(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
