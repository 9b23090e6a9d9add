//! Feed credentials and their encrypted local store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       EncryptedFileStore                 │
//! │  - KeyringBackend (get/set/delete)       │
//! │  - Lazy unlock with canary record        │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//!    (encrypt)            (decrypt)
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       Encryption Module                  │
//! │  - AES-256-GCM                           │
//! │  - Key = SHA-256(machine fingerprint)    │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       SQLite Database                    │
//! │  - Encrypted secrets at rest             │
//! │  - Reset when the fingerprint drifts     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Security
//!
//! - Every secret is encrypted with its own random nonce
//! - The key is derived on this machine and never written to disk
//! - [`Secret`] prints as `[REDACTED]` in `Debug` and `Display`

use std::fmt;

mod encryption;
mod fingerprint;
mod storage;

pub use fingerprint::Fingerprint;
pub use storage::{default_store_path, EncryptedFileStore};

pub use encryption::KEY_SIZE;

/// A secret value that never shows up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for the one place that must hand it out.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Where a credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Long-lived token taken from the environment
    Environment,
    /// Bearer token exchanged for a long-lived token
    ExchangedToken,
    /// Bearer token handed out as is (bearer-only mode)
    BearerPassthrough,
    /// Previously stored credential that still authorizes
    LocalStore,
}

/// Username/secret pair handed back to the keyring host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCredential {
    pub username: String,
    pub secret: Secret,
    pub source: CredentialSource,
}

impl FeedCredential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>, source: CredentialSource) -> Self {
        Self {
            username: username.into(),
            secret: Secret::new(secret),
            source,
        }
    }
}
