//! Integration tests for the token lifecycle and session facade
//!
//! Exercises refresh coalescing, refresh-expiry handling, revocation and
//! introspection against a mock provider.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use signet_oidc::testing::{MemoryStorage, PlaintextCipher};
use signet_oidc::{
    ClientConfig, OAuthClient, ReqwestTransport, RequestDispatcher, SecureSessionStore,
    SessionService, TokenError, TokenLifecycle, TokenSet, TokenTypeHint,
};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn discovery_document(base: &str) -> serde_json::Value {
    serde_json::json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/oauth/token"),
        "introspection_endpoint": format!("{base}/oauth/introspect"),
        "revocation_endpoint": format!("{base}/oauth/revoke"),
        "userinfo_endpoint": format!("{base}/userinfo"),
        "jwks_uri": format!("{base}/.well-known/jwks.json")
    })
}

async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(discovery_document(&server.uri())))
        .mount(server)
        .await;
}

struct SessionHarness {
    lifecycle: Arc<TokenLifecycle>,
    session: SessionService,
    store: Arc<SecureSessionStore>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn create_session(server: &MockServer) -> SessionHarness {
    init_tracing();
    let config = ClientConfig::new(
        server.uri(),
        "test_client_id",
        "http://localhost:8888/callback",
        vec!["openid".to_string()],
    )
    .expect("valid config");

    let store = Arc::new(SecureSessionStore::new(
        Arc::new(MemoryStorage::new()),
        Arc::new(PlaintextCipher),
    ));
    let oauth = Arc::new(OAuthClient::new(
        config,
        Arc::new(ReqwestTransport::new().expect("transport")),
    ));
    let lifecycle = Arc::new(TokenLifecycle::new(oauth, store.clone()));
    let session = SessionService::new(
        lifecycle.clone(),
        store.clone(),
        Arc::new(RequestDispatcher::new()),
    );

    SessionHarness {
        lifecycle,
        session,
        store,
    }
}

async fn seed_tokens(harness: &SessionHarness, refresh_token: Option<&str>) {
    let tokens = TokenSet::new(
        "AT1".to_string(),
        refresh_token.map(ToOwned::to_owned),
        None,
        3600,
        Some("openid".to_string()),
    );
    harness.store.save_tokens(&tokens).await.expect("save");
}

/// Validates that concurrent refresh calls coalesce onto one token-endpoint
/// request.
///
/// # Test Steps
/// 1. Seed a token set with refresh token RT1
/// 2. Mock the token endpoint with a delayed response and `expect(1)`
/// 3. Issue two refresh calls concurrently
/// 4. Verify both callers received the same new token set and exactly one
///    request reached the endpoint
#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_refresh_single_request() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=RT1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(100))
                .set_body_json(serde_json::json!({
                    "access_token": "AT2",
                    "refresh_token": "RT2",
                    "token_type": "Bearer",
                    "expires_in": 3600
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let harness = create_session(&server);
    seed_tokens(&harness, Some("RT1")).await;

    let (first, second) = tokio::join!(harness.lifecycle.refresh(), harness.lifecycle.refresh());
    let first = first.expect("refresh");
    let second = second.expect("refresh");

    assert_eq!(first.access_token, "AT2");
    assert_eq!(second.access_token, "AT2");
    assert_eq!(second.refresh_token, Some("RT2".to_string()));
}

/// Validates the refresh-expiry contract end to end: the lifecycle service
/// leaves the token set alone, the session facade clears it.
///
/// # Test Steps
/// 1. Mock the token endpoint to return `invalid_grant` with an expiry
///    description
/// 2. Refresh through the lifecycle service; verify `RefreshExpired` and
///    the stored token set unchanged
/// 3. Refresh through the session facade; verify `RefreshExpired` and the
///    session cleared
#[tokio::test(flavor = "multi_thread")]
async fn test_refresh_expired_contract() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "refresh token expired"
        })))
        .mount(&server)
        .await;

    let harness = create_session(&server);
    seed_tokens(&harness, Some("RT1")).await;

    // Lifecycle level: the service does not clear.
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

    // Facade level: the session auto-clears.
    let result = harness.session.refresh().await;
    assert!(matches!(result, Err(TokenError::RefreshExpired)));
    assert!(!harness.session.is_authenticated().await);
}

/// Validates the revoke-then-introspect contract against the mock
/// provider.
///
/// # Test Steps
/// 1. Mock revocation (200) and introspection (`active: false`)
/// 2. Revoke the access token; verify success and that the local token set
///    survives
/// 3. Introspect the same token; verify `active == false`
#[tokio::test(flavor = "multi_thread")]
async fn test_revoke_then_introspect_inactive() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/oauth/revoke"))
        .and(body_string_contains("token=AT1"))
        .and(body_string_contains("token_type_hint=access_token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/introspect"))
        .and(body_string_contains("token=AT1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"active": false})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let harness = create_session(&server);
    seed_tokens(&harness, Some("RT1")).await;

    let revoked = harness
        .session
        .revoke("AT1", TokenTypeHint::AccessToken)
        .await
        .expect("revoke");
    assert!(revoked);
    assert!(harness.session.is_authenticated().await);

    let introspection = harness
        .session
        .introspect("AT1", TokenTypeHint::AccessToken)
        .await
        .expect("introspect");
    assert!(!introspection.active);
}

/// Validates the inclusive expiry boundary through the session facade.
///
/// # Test Steps
/// 1. Store a token whose lifetime elapsed exactly now; verify expired
/// 2. Store a token one second before the boundary; verify not expired
/// 3. Verify the check without tokens fails with `NoTokens`
#[tokio::test(flavor = "multi_thread")]
async fn test_expiry_boundary_through_facade() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;

    let harness = create_session(&server);

    let result = harness.session.is_access_token_expired(0).await;
    assert!(matches!(result, Err(TokenError::NoTokens)));

    let mut tokens = TokenSet::new("AT1".to_string(), None, None, 3600, None);
    tokens.issued_at = Utc::now() - chrono::Duration::seconds(3600);
    harness.store.save_tokens(&tokens).await.expect("save");
    assert!(harness
        .session
        .is_access_token_expired(0)
        .await
        .expect("check"));

    tokens.issued_at = Utc::now() - chrono::Duration::seconds(3599);
    harness.store.save_tokens(&tokens).await.expect("save");
    assert!(!harness
        .session
        .is_access_token_expired(0)
        .await
        .expect("check"));
}

/// Validates cancellation of a dispatched refresh.
///
/// # Test Steps
/// 1. Mock the token endpoint with a long delay
/// 2. Dispatch a refresh, cancel the handle immediately
/// 3. Verify the outcome is cancellation and the stored token set is
///    unchanged
#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_refresh_leaves_tokens() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(30))
                .set_body_json(serde_json::json!({
                    "access_token": "AT2",
                    "token_type": "Bearer",
                    "expires_in": 3600
                })),
        )
        .mount(&server)
        .await;

    let harness = create_session(&server);
    seed_tokens(&harness, Some("RT1")).await;

    let handle = harness.session.dispatch_refresh();
    handle.cancel();

    let outcome = handle.outcome().await;
    assert!(outcome.is_cancelled());

    let stored = harness
        .store
        .load_tokens()
        .await
        .expect("load")
        .expect("tokens");
    assert_eq!(stored.access_token, "AT1");
}

/// Validates the userinfo call with the stored access token.
///
/// # Test Steps
/// 1. Mock the userinfo endpoint requiring the bearer header
/// 2. Fetch user info through the session facade
/// 3. Verify the returned claims
#[tokio::test(flavor = "multi_thread")]
async fn test_user_info_with_bearer_token() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer AT1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sub": "user123",
            "email": "user@example.com"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = create_session(&server);
    seed_tokens(&harness, None).await;

    let claims = harness.session.user_info().await.expect("user info");
    assert_eq!(claims["sub"], "user123");
    assert_eq!(claims["email"], "user@example.com");
}
