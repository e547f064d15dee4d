//! OAuth 2.0 / OIDC value types
//!
//! Defines the token bundle, wire-format response types, and the provider
//! error body shared by the flow and lifecycle modules.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Issued credentials for one session
///
/// A token set is either fully present (non-empty access token) or entirely
/// absent from the session store; it is replaced wholesale on refresh and
/// never partially mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token for API authentication.
    pub access_token: String,

    /// Refresh token for obtaining new access tokens.
    /// Optional because some providers don't issue them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token (JWT) containing user claims (OpenID Connect).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Token type (always "Bearer" for OAuth 2.0).
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: i64,

    /// Issuance timestamp (UTC), captured when the token set was created
    /// from a token-endpoint response.
    pub issued_at: DateTime<Utc>,

    /// Granted scopes (space-separated).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenSet {
    /// Create a new `TokenSet` issued now.
    ///
    /// # Arguments
    /// * `access_token` - The access token
    /// * `refresh_token` - Optional refresh token
    /// * `id_token` - Optional ID token (OpenID Connect)
    /// * `expires_in` - Token lifetime in seconds
    /// * `scope` - Optional space-separated scopes
    #[must_use]
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        id_token: Option<String>,
        expires_in: i64,
        scope: Option<String>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            id_token,
            token_type: "Bearer".to_string(),
            expires_in,
            issued_at: Utc::now(),
            scope,
        }
    }

    /// Check whether the access token is expired or will expire within the
    /// given skew.
    ///
    /// The boundary is inclusive: a token whose lifetime elapsed exactly now
    /// is expired.
    ///
    /// # Arguments
    /// * `skew_seconds` - Seconds before nominal expiry to already treat the
    ///   token as expired (clock-skew allowance)
    #[must_use]
    pub fn is_expired(&self, skew_seconds: i64) -> bool {
        Utc::now() >= self.issued_at + Duration::seconds(self.expires_in - skew_seconds)
    }

    /// Absolute expiration timestamp derived from issuance and lifetime.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::seconds(self.expires_in)
    }

    /// Seconds until nominal expiry (negative once past it).
    #[must_use]
    pub fn seconds_until_expiry(&self) -> i64 {
        (self.expires_at() - Utc::now()).num_seconds()
    }
}

/// OAuth token response from the authorization server
///
/// Standard OAuth 2.0 token response format (RFC 6749).
/// Deserializes responses from the token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: String,
    pub expires_in: i64,
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert the wire response into a stored token set.
    ///
    /// Providers that do not rotate refresh tokens omit the field from
    /// refresh responses; the previous refresh token is carried over so a
    /// still-valid credential is never silently dropped.
    #[must_use]
    pub fn into_token_set(self, previous_refresh_token: Option<String>) -> TokenSet {
        let refresh_token = self.refresh_token.or(previous_refresh_token);
        let mut tokens = TokenSet::new(
            self.access_token,
            refresh_token,
            self.id_token,
            self.expires_in,
            self.scope,
        );
        tokens.token_type = self.token_type;
        tokens
    }
}

/// OAuth error response from the authorization server
///
/// Standard OAuth 2.0 error response format (RFC 6749 §5.2).
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    pub error_description: Option<String>,
}

impl fmt::Display for OAuthErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {}", self.error, desc),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for OAuthErrorResponse {}

/// Hint passed to the introspection and revocation endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
    IdToken,
}

impl TokenTypeHint {
    /// Wire value for the `token_type_hint` parameter.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::IdToken => "id_token",
        }
    }
}

impl fmt::Display for TokenTypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Introspection response (RFC 7662)
///
/// `active` is the only guaranteed field; everything else is
/// provider-dependent and surfaced through the typed options or the
/// flattened claim map.
#[derive(Debug, Clone, Deserialize)]
pub struct IntrospectionResult {
    pub active: bool,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub token_type: Option<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub sub: Option<String>,
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}
