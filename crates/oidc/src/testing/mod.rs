//! Test support
//!
//! In-memory implementations of the engine's injection seams: storage
//! backend, session cipher, HTTP transport, and redirect launcher. Used by
//! this crate's own tests and available to downstream test code; none of
//! them touch the network, a keychain, or disk.

pub mod mocks;

pub use mocks::{
    MemoryStorage, MockTransport, PlaintextCipher, ScriptedRedirect, ScriptedRedirectLauncher,
    UnavailableCipher,
};
