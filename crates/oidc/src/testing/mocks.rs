//! Mock implementations of the engine's collaborator traits
//!
//! Deterministic stand-ins for tests: no network, no platform keychain, no
//! disk.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::crypto::{CipherError, SessionCipher};
use crate::flow::{RedirectLauncher, RedirectResult};
use crate::http::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::store::{StorageBackend, StoreError};

/// In-memory storage backend.
///
/// Entries are whole-value replaced under one lock, which gives the
/// per-entry atomicity the store contract requires.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored bytes for a key, bypassing the store's cipher layer.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().get(key).cloned()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Whether the backend holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.data.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.data.lock().remove(key);
        Ok(())
    }
}

/// Identity cipher: stores plaintext as-is. Keeps test assertions readable.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextCipher;

impl SessionCipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(ciphertext.to_vec())
    }
}

/// Cipher whose key material is permanently unavailable: every decrypt
/// fails with the recoverable signal. Simulates platform key invalidation.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableCipher;

impl SessionCipher for UnavailableCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, _ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Err(CipherError::Unavailable)
    }
}

#[derive(Debug, Clone)]
struct MockResponse {
    status: u16,
    body: String,
    delay: Option<Duration>,
}

/// Mock HTTP transport keyed by request URL.
///
/// Sticky responses answer every request to their URL; queued sequences
/// answer one request each and take precedence. Every request is logged for
/// assertions.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, MockResponse>>,
    sequences: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    /// Create a transport with no configured responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a sticky response for a URL.
    pub fn add_response(&self, url: &str, status: u16, body: &str) {
        self.responses.lock().insert(
            url.to_string(),
            MockResponse {
                status,
                body: body.to_string(),
                delay: None,
            },
        );
    }

    /// Configure a sticky response that is delivered after a delay.
    pub fn add_delayed_response(&self, url: &str, status: u16, body: &str, delay: Duration) {
        self.responses.lock().insert(
            url.to_string(),
            MockResponse {
                status,
                body: body.to_string(),
                delay: Some(delay),
            },
        );
    }

    /// Configure a one-shot response sequence for a URL; each entry answers
    /// exactly one request.
    pub fn add_response_sequence(&self, url: &str, responses: Vec<(u16, &str)>) {
        let queue = responses
            .into_iter()
            .map(|(status, body)| MockResponse {
                status,
                body: body.to_string(),
                delay: None,
            })
            .collect();
        self.sequences.lock().insert(url.to_string(), queue);
    }

    /// All requests sent through this transport.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests sent to a URL.
    #[must_use]
    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.url == url)
            .count()
    }

    /// Whether any request was sent to a URL.
    #[must_use]
    pub fn was_called(&self, url: &str) -> bool {
        self.request_count(url) > 0
    }

    /// The most recent request, if any.
    #[must_use]
    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().last().cloned()
    }

    fn next_response(&self, url: &str) -> Option<MockResponse> {
        if let Some(queue) = self.sequences.lock().get_mut(url) {
            if let Some(response) = queue.pop_front() {
                return Some(response);
            }
        }
        self.responses.lock().get(url).cloned()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.clone();
        self.requests.lock().push(request);

        let Some(response) = self.next_response(&url) else {
            return Err(TransportError::Request(format!(
                "no mock response configured for {url}"
            )));
        };

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }

        Ok(HttpResponse {
            status: response.status,
            headers: Vec::new(),
            body: response.body.into_bytes(),
        })
    }
}

/// One scripted reaction of the redirect launcher.
#[derive(Debug, Clone)]
pub enum ScriptedRedirect {
    /// Authorize with the given code, echoing the state parsed from the
    /// authorization URL.
    Authorize { code: String },
    /// Authorize with an explicit (possibly wrong) state.
    AuthorizeWithState { code: String, state: String },
    /// Return a provider error, echoing the parsed state.
    Error {
        error: String,
        error_description: Option<String>,
    },
    /// The user dismissed the browser.
    Cancel,
}

/// Scripted redirect launcher.
///
/// Pops one scripted step per launch; with an empty script every launch
/// cancels. Parses the `state` query parameter out of the authorization URL
/// so scripts can echo it the way a real provider would.
#[derive(Debug, Default)]
pub struct ScriptedRedirectLauncher {
    script: Mutex<VecDeque<ScriptedRedirect>>,
    launched: Mutex<Vec<String>>,
}

impl ScriptedRedirectLauncher {
    /// Create a launcher with an empty script (every launch cancels).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience: a launcher whose next launch authorizes with `code`.
    #[must_use]
    pub fn authorizing_with_code(code: &str) -> Self {
        let launcher = Self::new();
        launcher.push(ScriptedRedirect::Authorize {
            code: code.to_string(),
        });
        launcher
    }

    /// Append a scripted step.
    pub fn push(&self, step: ScriptedRedirect) {
        self.script.lock().push_back(step);
    }

    /// URLs handed to the launcher, in order.
    #[must_use]
    pub fn launched_urls(&self) -> Vec<String> {
        self.launched.lock().clone()
    }
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

#[async_trait]
impl RedirectLauncher for ScriptedRedirectLauncher {
    async fn launch(&self, authorization_url: &str) -> RedirectResult {
        self.launched.lock().push(authorization_url.to_string());

        let step = self.script.lock().pop_front();
        let echoed_state = query_param(authorization_url, "state").unwrap_or_default();

        match step {
            Some(ScriptedRedirect::Authorize { code }) => RedirectResult::Authorized {
                code,
                state: echoed_state,
            },
            Some(ScriptedRedirect::AuthorizeWithState { code, state }) => {
                RedirectResult::Authorized { code, state }
            }
            Some(ScriptedRedirect::Error {
                error,
                error_description,
            }) => RedirectResult::Error {
                error,
                error_description,
                state: Some(echoed_state),
            },
            Some(ScriptedRedirect::Cancel) | None => RedirectResult::Cancelled,
        }
    }
}
