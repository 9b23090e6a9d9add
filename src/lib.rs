//! Keyring backend that resolves credentials for Azure Artifacts feeds.
//!
//! The entry point is [`ArtifactsKeyring`], which implements [`KeyringBackend`]:
//!
//! ```no_run
//! use artifacts_keyring::{ArtifactsKeyring, KeyringBackend, Settings};
//!
//! # fn main() -> anyhow::Result<()> {
//! let keyring = ArtifactsKeyring::from_settings(Settings::from_env())?;
//! let password = keyring.get_password(
//!     "https://pkgs.dev.azure.com/org/project/_packaging/feed/pypi/simple/",
//!     "VssSessionToken",
//! )?;
//! # Ok(())
//! # }
//! ```

// Settings from environment and TOML
pub mod config;

// Subscriber setup for the binary
pub mod logging;

// Structured diagnostic hook
pub mod diagnostics;

// Secret-store backend contract
pub mod keyring;

// Feed URL classification and normalization
pub mod feed;

// Blocking HTTP transport
pub mod http;

// Encrypted local store and machine fingerprint
pub mod credentials;

// Identity sources and the fallback chain
pub mod identity;

// Discovery, exchange and validation
pub mod provider;

// Credential resolution engine
pub mod engine;

pub use config::{Settings, StoredCredentialPolicy};
pub use credentials::{CredentialSource, EncryptedFileStore, FeedCredential, Secret};
pub use diagnostics::{Diagnostic, DiagnosticHook, Diagnostics};
pub use engine::ArtifactsKeyring;
pub use keyring::{KeyringBackend, KeyringError};
pub use provider::{CredentialProvider, FeedCredentialProvider};
