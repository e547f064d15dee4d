//! OIDC provider discovery document
//!
//! The metadata document is fetched from the provider's
//! `.well-known/openid-configuration` location on the first flow start,
//! cached in the session store, and refreshed only on explicit invalidation.

use serde::{Deserialize, Serialize};

/// Provider metadata published by the authorization server.
///
/// Only the endpoints this engine uses are modeled; unrelated discovery
/// fields are ignored during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier; must match the configured issuer.
    pub issuer: String,

    /// Authorization endpoint for the browser redirect.
    pub authorization_endpoint: String,

    /// Token endpoint for code exchange and refresh.
    pub token_endpoint: String,

    /// Introspection endpoint (RFC 7662), if published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,

    /// Revocation endpoint (RFC 7009), if published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,

    /// RP-initiated logout endpoint, if published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    /// UserInfo endpoint, if published.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// JSON Web Key Set location for ID-token signature resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// ID-token signing algorithms the provider supports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token_signing_alg_values_supported: Option<Vec<String>>,
}

impl ProviderMetadata {
    /// Check the document's issuer claim against the expected issuer.
    ///
    /// A mismatching issuer means the discovery response was served for (or
    /// spoofed from) a different provider and must not be trusted.
    #[must_use]
    pub fn issuer_matches(&self, expected: &str) -> bool {
        self.issuer.trim_end_matches('/') == expected.trim_end_matches('/')
    }
}
