//! Secret-store backend contract.
//!
//! A keyring host picks backends by [`KeyringBackend::priority`] and calls
//! them with `(service, username)` pairs. Both the resolution engine and the
//! encrypted file store implement this trait; the engine receives the store
//! as its fallback at construction time.

use crate::credentials::{CredentialSource, FeedCredential, Secret};

/// Keyring backend errors
#[derive(Debug)]
pub enum KeyringError {
    /// Operation deliberately not implemented by this backend; the host
    /// should try the next one
    Unsupported,
    /// Nothing stored under the requested key
    NotFound,
    /// Storage or transport failure
    Backend(anyhow::Error),
}

impl std::fmt::Display for KeyringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyringError::Unsupported => write!(f, "Operation not supported by this backend"),
            KeyringError::NotFound => write!(f, "No password stored for this service and username"),
            KeyringError::Backend(e) => write!(f, "Keyring backend error: {:#}", e),
        }
    }
}

impl std::error::Error for KeyringError {}

impl From<anyhow::Error> for KeyringError {
    fn from(e: anyhow::Error) -> Self {
        KeyringError::Backend(e)
    }
}

pub trait KeyringBackend: Send + Sync {
    /// Higher values are preferred by the host. Negative means "never pick".
    fn priority(&self) -> f64;

    fn get_password(&self, service: &str, username: &str) -> Result<Option<String>, KeyringError>;

    fn set_password(&self, service: &str, username: &str, password: &str) -> Result<(), KeyringError>;

    fn delete_password(&self, service: &str, username: &str) -> Result<(), KeyringError>;

    /// Username and secret for `service`.
    ///
    /// Backends that cannot enumerate usernames only answer when `username`
    /// is given.
    fn get_credential(
        &self,
        service: &str,
        username: Option<&str>,
    ) -> Result<Option<FeedCredential>, KeyringError> {
        let Some(username) = username else {
            return Ok(None);
        };
        Ok(self
            .get_password(service, username)?
            .map(|password| FeedCredential {
                username: username.to_string(),
                secret: Secret::new(password),
                source: CredentialSource::LocalStore,
            }))
    }
}
