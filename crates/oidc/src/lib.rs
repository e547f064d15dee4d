//! Client-side OAuth 2.0 / OpenID Connect engine
//!
//! Drives the authorization-code-with-PKCE flow against a
//! standards-compliant identity provider, exchanges codes for tokens,
//! maintains an encrypted persistent session, and exposes the token
//! lifecycle (refresh, introspect, revoke, clear) to the embedding
//! application.
//!
//! # Features
//!
//! - **PKCE flow**: RFC 7636 compliant Proof Key for Code Exchange; no
//!   client secret required
//! - **Redirect-crossing resumption**: the in-flight authorization request
//!   is persisted before the browser redirect and resumes deterministically,
//!   even in a fresh process
//! - **Encrypted session store**: token set, pending request and provider
//!   metadata are independently encrypted through an injected cipher
//! - **Token lifecycle**: single-flight refresh with coalescing,
//!   introspection, revocation, user info
//! - **Cancellable dispatch**: every network operation resolves to exactly
//!   one terminal outcome (success, error, cancelled)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   AuthService    │  Composition-root facade
//! └────────┬─────────┘
//!          │
//!          ├──► AuthorizationFlow   (state machine across the redirect)
//!          ├──► SessionService      (post-authorization surface)
//!          │         │
//!          │         └──► TokenLifecycle   (refresh / introspect / revoke)
//!          │
//!          ├──► OAuthClient         (wire protocol over HttpTransport)
//!          ├──► SecureSessionStore  (encrypted persistence)
//!          └──► RequestDispatcher   (off-thread execution, cancellation)
//! ```
//!
//! The engine depends on four injected collaborator seams, selected at
//! composition time: [`HttpTransport`] (wire plumbing),
//! [`StorageBackend`] (byte persistence), [`SessionCipher`] (platform key
//! storage) and [`RedirectLauncher`] (external browser).
//!
//! # Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use signet_oidc::testing::{MemoryStorage, ScriptedRedirectLauncher};
//! use signet_oidc::{AesGcmCipher, AuthService, ClientConfig, ReqwestTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new(
//!         "https://auth.example.com",
//!         "your_client_id",
//!         "http://localhost:8888/callback",
//!         vec!["openid".to_string(), "profile".to_string(), "offline_access".to_string()],
//!     )?;
//!
//!     // A real application injects a launcher that opens the system
//!     // browser and returns the redirect result.
//!     let service = AuthService::new(
//!         config,
//!         Arc::new(ReqwestTransport::new()?),
//!         Arc::new(MemoryStorage::new()),
//!         Arc::new(AesGcmCipher::new(&AesGcmCipher::generate_key())?),
//!         Arc::new(ScriptedRedirectLauncher::new()),
//!     );
//!
//!     // Restore any persisted session or in-flight authorization.
//!     service.restore().await?;
//!
//!     // Drive the browser-based sign-in end to end.
//!     let tokens = service.sign_in(None).await?;
//!     println!("signed in; access token expires in {} seconds", tokens.expires_in);
//!
//!     // Token lifecycle operations go through the session facade.
//!     let access_token = service.session().access_token().await?;
//!     let _ = access_token;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - **[`config`]**: immutable client registration
//! - **[`pkce`]**: PKCE, state, and nonce generation
//! - **[`types`]**: token set and wire-format value types
//! - **[`metadata`]**: OIDC discovery document
//! - **[`http`]**: HTTP transport boundary
//! - **[`crypto`]**: session-state encryption
//! - **[`store`]**: encrypted session persistence
//! - **[`client`]**: OAuth wire-protocol client
//! - **[`dispatch`]**: cancellable request dispatch
//! - **[`flow`]**: authorization-code flow state machine
//! - **[`lifecycle`]**: token lifecycle service
//! - **[`session`]** / **[`service`]**: application-facing facades
//! - **[`testing`]**: in-memory mock collaborators
//!
//! # Security Notes
//!
//! - State and nonce are single-use: a mismatched redirect burns the
//!   persisted request, and an ID token with the wrong nonce is rejected
//!   before anything is stored
//! - Token and verifier values are never logged
//! - ID-token signature verification is delegated to a key-resolution
//!   collaborator via the published `jwks_uri`; this crate validates the
//!   nonce claim only

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod client;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod flow;
pub mod http;
pub mod lifecycle;
pub mod metadata;
pub mod pkce;
pub mod service;
pub mod session;
pub mod store;
pub mod testing;
pub mod types;

// Re-export commonly used types
pub use client::{OAuthClient, OAuthClientError};
pub use config::{ClientConfig, ConfigError};
pub use crypto::{AesGcmCipher, CipherError, SessionCipher};
pub use dispatch::{DispatchHandle, Outcome, RequestDispatcher};
pub use flow::{
    AuthorizationFlow, AuthorizationPayload, AuthorizationRequest, FlowError, FlowState,
    RedirectLauncher, RedirectResult,
};
pub use http::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
};
pub use lifecycle::{TokenError, TokenLifecycle};
pub use metadata::ProviderMetadata;
pub use pkce::{
    generate_code_challenge, generate_code_verifier, generate_nonce, generate_state, PkceParams,
};
pub use service::AuthService;
pub use session::SessionService;
pub use store::{
    SecureSessionStore, StorageBackend, StoreError, PENDING_REQUEST_KEY, PROVIDER_METADATA_KEY,
    TOKEN_SET_KEY,
};
pub use types::{
    IntrospectionResult, OAuthErrorResponse, TokenResponse, TokenSet, TokenTypeHint,
};
