//! PKCE (Proof Key for Code Exchange) and request-correlation tokens
//!
//! Implements RFC 7636 challenge generation for OAuth authorization without
//! client secrets, plus the `state` and `nonce` values that correlate an
//! authorization request across the external-browser redirect boundary.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Entropy per generated token. 32 bytes encode to 43 base64url characters,
/// which satisfies both the RFC 7636 verifier range (43-128) and the minimum
/// entropy for `state`/`nonce` (16 bytes).
const TOKEN_ENTROPY_BYTES: usize = 32;

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
    rand::thread_rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a cryptographically secure code verifier
///
/// Returns a URL-safe base64-encoded random string of 32 bytes (43
/// characters). Per RFC 7636, verifiers must be 43-128 characters long.
#[must_use]
pub fn generate_code_verifier() -> String {
    random_token()
}

/// Generate the code challenge for a verifier using SHA-256
///
/// Per RFC 7636, the challenge is BASE64URL(SHA256(ASCII(code_verifier)))
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a random state token for CSRF protection
///
/// The state is round-tripped through the authorization redirect and must
/// match exactly on return; it is single-use.
#[must_use]
pub fn generate_state() -> String {
    random_token()
}

/// Generate a random nonce bound into the ID token
///
/// The provider embeds the nonce in the issued ID token; the flow validates
/// it against the persisted value before accepting a token set.
#[must_use]
pub fn generate_nonce() -> String {
    random_token()
}

/// PKCE parameters for one authorization attempt
///
/// Contains the code verifier (sent during token exchange) and the code
/// challenge (sent in the authorization request). Plain-text PKCE is not
/// supported; the method is always `S256`.
#[derive(Debug, Clone)]
pub struct PkceParams {
    /// Random string (43 chars, base64url encoded).
    /// Kept secret until token exchange.
    pub verifier: String,

    /// SHA-256 hash of the verifier (base64url encoded).
    /// Sent in the authorization request for server-side validation.
    pub challenge: String,
}

impl PkceParams {
    /// Generate a new verifier/challenge pair from the secure random source.
    #[must_use]
    pub fn generate() -> Self {
        let verifier = generate_code_verifier();
        let challenge = generate_code_challenge(&verifier);
        Self { verifier, challenge }
    }

    /// Get the challenge method (always "S256" for SHA-256)
    #[must_use]
    pub fn challenge_method(&self) -> &'static str {
        "S256"
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for pkce.
    use super::*;

    /// Validates `PkceParams::generate` behavior for the verifier length
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures `params.verifier.len() >= 43` evaluates to true.
    /// - Ensures `params.verifier.len() <= 128` evaluates to true.
    /// - Ensures `!params.challenge.is_empty()` evaluates to true.
    #[test]
    fn test_generate_pkce_params() {
        let params = PkceParams::generate();

        assert!(
            params.verifier.len() >= 43,
            "verifier too short: {} chars",
            params.verifier.len()
        );
        assert!(
            params.verifier.len() <= 128,
            "verifier too long: {} chars",
            params.verifier.len()
        );
        assert!(!params.challenge.is_empty());
    }

    /// Validates `PkceParams::generate` behavior for the unique values
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms `first.verifier` differs from `second.verifier`.
    /// - Confirms `first.challenge` differs from `second.challenge`.
    /// - Confirms `generate_state()` outputs differ across calls.
    /// - Confirms `generate_nonce()` outputs differ across calls.
    #[test]
    fn test_unique_values() {
        let first = PkceParams::generate();
        let second = PkceParams::generate();

        assert_ne!(first.verifier, second.verifier);
        assert_ne!(first.challenge, second.challenge);
        assert_ne!(generate_state(), generate_state());
        assert_ne!(generate_nonce(), generate_nonce());
    }

    /// Validates `PkceParams::generate` behavior for the challenge method
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms `params.challenge_method()` equals `"S256"`.
    #[test]
    fn test_challenge_method() {
        let params = PkceParams::generate();
        assert_eq!(params.challenge_method(), "S256");
    }

    /// Validates `PkceParams::generate` behavior for the base64url encoding
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures verifier, challenge, state, and nonce contain no padding
    ///   characters.
    /// - Ensures all values use only the URL-safe alphabet (no `+` or `/`).
    #[test]
    fn test_base64url_encoding() {
        let params = PkceParams::generate();
        let state = generate_state();
        let nonce = generate_nonce();

        for value in [&params.verifier, &params.challenge, &state, &nonce] {
            assert!(!value.contains('='));
            assert!(!value.contains('+'));
            assert!(!value.contains('/'));
            assert!(value.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_'));
        }
    }

    /// Validates `generate_code_challenge` behavior for the deterministic
    /// challenge scenario.
    ///
    /// Assertions:
    /// - Confirms `params.challenge` equals the recomputed challenge for the
    ///   same verifier.
    #[test]
    fn test_code_challenge_deterministic() {
        let params = PkceParams::generate();

        let recomputed = generate_code_challenge(&params.verifier);
        assert_eq!(params.challenge, recomputed);
    }

    /// Validates `generate_state` behavior for the minimum entropy scenario.
    ///
    /// Assertions:
    /// - Ensures `state.len() >= 22` evaluates to true (16 bytes base64url).
    /// - Ensures `nonce.len() >= 22` evaluates to true.
    #[test]
    fn test_state_and_nonce_entropy() {
        let state = generate_state();
        let nonce = generate_nonce();

        assert!(state.len() >= 22);
        assert!(nonce.len() >= 22);
    }
}
