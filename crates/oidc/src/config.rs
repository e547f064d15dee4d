//! Immutable OAuth client registration
//!
//! A [`ClientConfig`] is constructed once at startup by the composition root
//! and validated eagerly: a missing issuer, client id or redirect URI fails
//! construction instead of surfacing later as a broken authorization request.

use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Error type for configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was empty.
    #[error("missing required configuration field: {0}")]
    MissingField(&'static str),

    /// A URL field did not parse.
    #[error("invalid {field} URL '{value}': {source}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        source: url::ParseError,
    },
}

/// Registered OAuth 2.0 / OIDC client.
///
/// Immutable for the process lifetime. The discovery URI defaults to the
/// issuer's `.well-known/openid-configuration` location and can be overridden
/// for providers that publish metadata elsewhere.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Issuer URL (e.g. "https://auth.example.com" or a tenant-scoped
    /// issuer like "https://example.com/oauth2/default").
    pub issuer: String,

    /// OAuth client ID.
    pub client_id: String,

    /// Redirect URI (loopback for desktop apps, deep link for mobile).
    pub redirect_uri: String,

    /// OAuth scopes to request.
    pub scopes: Vec<String>,

    /// Discovery document location.
    pub discovery_uri: String,

    /// Maximum age of a persisted authorization request before `resume`
    /// rejects it as stale. `None` means indefinite.
    pub request_ttl: Option<Duration>,
}

impl ClientConfig {
    /// Create a validated client configuration.
    ///
    /// # Arguments
    /// * `issuer` - Issuer URL of the authorization server
    /// * `client_id` - OAuth client ID
    /// * `redirect_uri` - Redirect URI registered for this client
    /// * `scopes` - Scopes to request (e.g. `openid`, `profile`,
    ///   `offline_access`)
    ///
    /// # Errors
    /// Returns `ConfigError` if issuer, client id or redirect URI is empty or
    /// not a valid URL.
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let issuer = issuer.into();
        let client_id = client_id.into();
        let redirect_uri = redirect_uri.into();

        validate_non_empty("issuer", &issuer)?;
        validate_non_empty("client_id", &client_id)?;
        validate_non_empty("redirect_uri", &redirect_uri)?;
        validate_url("issuer", &issuer)?;
        validate_url("redirect_uri", &redirect_uri)?;

        let discovery_uri = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );

        Ok(Self {
            issuer,
            client_id,
            redirect_uri,
            scopes,
            discovery_uri,
            request_ttl: None,
        })
    }

    /// Override the discovery document location.
    #[must_use]
    pub fn with_discovery_uri(mut self, discovery_uri: impl Into<String>) -> Self {
        self.discovery_uri = discovery_uri.into();
        self
    }

    /// Bound the lifetime of a persisted authorization request.
    #[must_use]
    pub fn with_request_ttl(mut self, ttl: Duration) -> Self {
        self.request_ttl = Some(ttl);
        self
    }

    /// Get scopes as space-separated string
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

fn validate_non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field));
    }
    Ok(())
}

fn validate_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    //! Unit tests for config.
    use super::*;

    fn create_test_config() -> ClientConfig {
        ClientConfig::new(
            "https://auth.example.com",
            "test_client_id",
            "http://localhost:8888/callback",
            vec!["openid".to_string(), "profile".to_string()],
        )
        .expect("valid config")
    }

    /// Validates `ClientConfig::new` behavior for the config creation
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms `config.issuer` equals `"https://auth.example.com"`.
    /// - Confirms `config.client_id` equals `"test_client_id"`.
    /// - Confirms `config.scopes.len()` equals `2`.
    /// - Ensures `config.request_ttl.is_none()` evaluates to true.
    #[test]
    fn test_config_creation() {
        let config = create_test_config();

        assert_eq!(config.issuer, "https://auth.example.com");
        assert_eq!(config.client_id, "test_client_id");
        assert_eq!(config.scopes.len(), 2);
        assert!(config.request_ttl.is_none());
    }

    /// Validates `ClientConfig::new` behavior for the default discovery uri
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms `config.discovery_uri` equals `"https://auth.example.com/.well-known/openid-configuration"`.
    /// - Confirms a trailing issuer slash does not double up in the URI.
    #[test]
    fn test_default_discovery_uri() {
        let config = create_test_config();
        assert_eq!(
            config.discovery_uri,
            "https://auth.example.com/.well-known/openid-configuration"
        );

        let trailing = ClientConfig::new(
            "https://auth.example.com/",
            "client",
            "http://localhost/callback",
            vec![],
        )
        .expect("valid config");
        assert_eq!(
            trailing.discovery_uri,
            "https://auth.example.com/.well-known/openid-configuration"
        );
    }

    /// Validates `ClientConfig::new` behavior for the missing field
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures empty issuer, client id, and redirect URI each fail with
    ///   `ConfigError::MissingField`.
    #[test]
    fn test_missing_fields_fail_fast() {
        let issuer = ClientConfig::new("", "client", "http://localhost/cb", vec![]);
        assert!(matches!(issuer, Err(ConfigError::MissingField("issuer"))));

        let client = ClientConfig::new("https://auth.example.com", "  ", "http://localhost/cb", vec![]);
        assert!(matches!(client, Err(ConfigError::MissingField("client_id"))));

        let redirect = ClientConfig::new("https://auth.example.com", "client", "", vec![]);
        assert!(matches!(redirect, Err(ConfigError::MissingField("redirect_uri"))));
    }

    /// Validates `ClientConfig::new` behavior for the invalid url scenario.
    ///
    /// Assertions:
    /// - Ensures `matches!(result, Err(ConfigError::InvalidUrl { field:
    ///   "issuer", .. }))` evaluates to true.
    #[test]
    fn test_invalid_issuer_url() {
        let result = ClientConfig::new("not a url", "client", "http://localhost/cb", vec![]);
        assert!(matches!(result, Err(ConfigError::InvalidUrl { field: "issuer", .. })));
    }

    /// Validates `ClientConfig::with_discovery_uri` behavior for the override
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms `config.discovery_uri` equals the override value.
    /// - Confirms `config.request_ttl` equals `Some(ttl)` after
    ///   `with_request_ttl`.
    #[test]
    fn test_overrides() {
        let ttl = Duration::from_secs(600);
        let config = create_test_config()
            .with_discovery_uri("https://auth.example.com/custom/discovery")
            .with_request_ttl(ttl);

        assert_eq!(config.discovery_uri, "https://auth.example.com/custom/discovery");
        assert_eq!(config.request_ttl, Some(ttl));
    }

    /// Validates `ClientConfig::scope_string` behavior for the scope join
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms `config.scope_string()` equals `"openid profile"`.
    #[test]
    fn test_scope_string() {
        let config = create_test_config();
        assert_eq!(config.scope_string(), "openid profile");
    }
}
