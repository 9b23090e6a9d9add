//! Credential resolution engine.
//!
//! Per call:
//!
//! ```text
//! host check ─▶ in-process cache ─▶ local store + probe ─▶ provider ─▶ remember
//!               (get_password)      (not bearer mode)                (not bearer mode)
//! ```
//!
//! Acquisition failures surface as "no credential" so the host can fall
//! through to its next backend. Nothing here returns a secret inside an
//! error or a log line.

use crate::config::{Settings, StoredCredentialPolicy};
use crate::credentials::{default_store_path, CredentialSource, EncryptedFileStore, FeedCredential, Secret};
use crate::diagnostics::{Diagnostic, DiagnosticHook, Diagnostics};
use crate::feed;
use crate::http::{HttpClient, ReqwestClient};
use crate::identity::AzureSourceFactory;
use crate::keyring::{KeyringBackend, KeyringError};
use crate::provider::{CredentialProvider, FeedCredentialProvider, ProbeOutcome};
use anyhow::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;


/// Preferred over the platform keyrings until the local store is used.
pub const PRIORITY: f64 = 9.9;
/// After falling back to the local store; hosts must not re-select us.
pub const DEMOTED_PRIORITY: f64 = -1.0;

/// Keyring backend for Azure Artifacts feeds.
pub struct ArtifactsKeyring {
    provider: Arc<dyn CredentialProvider>,
    fallback: Arc<dyn KeyringBackend>,
    settings: Settings,
    /// (service, username) → secret, for raw and normalized service forms
    cache: DashMap<(String, String), Secret>,
    demoted: AtomicBool,
    diagnostics: Diagnostics,
}

impl ArtifactsKeyring {
    pub fn new(provider: Arc<dyn CredentialProvider>, fallback: Arc<dyn KeyringBackend>, settings: Settings) -> Self {
        Self {
            provider,
            fallback,
            settings,
            cache: DashMap::new(),
            demoted: AtomicBool::new(false),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn with_diagnostics(mut self, hook: DiagnosticHook) -> Self {
        self.diagnostics = Diagnostics::new(hook);
        self
    }

    /// Production wiring: reqwest transport, Azure identity sources and the
    /// encrypted file store.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        Self::from_settings_with_diagnostics(settings, Diagnostics::default())
    }

    pub fn from_settings_with_diagnostics(settings: Settings, diagnostics: Diagnostics) -> Result<Self> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new()?);
        let sources = Arc::new(AzureSourceFactory::new(http.clone(), &settings));
        let store_path = settings.store_path.clone().unwrap_or_else(default_store_path);
        tracing::debug!(path = %store_path.display(), "Using encrypted local store");

        let provider = FeedCredentialProvider::new(http, sources, settings.clone())
            .with_diagnostics(diagnostics.clone());
        let mut keyring = Self::new(
            Arc::new(provider),
            Arc::new(EncryptedFileStore::new(store_path)),
            settings,
        );
        keyring.diagnostics = diagnostics;
        Ok(keyring)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The fallback store. First use demotes this backend's priority.
    fn local_backend(&self) -> &dyn KeyringBackend {
        if !self.demoted.swap(true, Ordering::SeqCst) {
            tracing::info!(
                priority = DEMOTED_PRIORITY,
                "Local store in use, lowering keyring priority"
            );
        }
        self.fallback.as_ref()
    }

    /// Resolve a credential for `service`. Never fails: every problem is
    /// logged and reported as `None`.
    pub fn resolve_credential(&self, service: &str, username: &str) -> Option<FeedCredential> {
        if !feed::is_supported_url(service) {
            tracing::debug!(service = %feed::redact(service), "Not an Azure Artifacts feed");
            self.diagnostics.emit(Diagnostic::UnsupportedHost {
                service: feed::redact(service),
            });
            return None;
        }

        let bearer_mode = self.settings.use_bearer_token;
        if !bearer_mode && !username.is_empty() {
            if let Some(credential) = self.stored_credential(service, username) {
                return Some(credential);
            }
        }

        let credential = match self.provider.get_credentials(service) {
            Ok(Some(credential)) => credential,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(service = %feed::redact(service), error = %format!("{:#}", e), "Failed to acquire credentials");
                self.diagnostics.emit(Diagnostic::AcquisitionFailed {
                    service: feed::redact(service),
                    error: e.to_string(),
                });
                return None;
            }
        };
        tracing::debug!(
            service = %feed::redact(service),
            username = %credential.username,
            source = ?credential.source,
            "Provisioned credentials"
        );

        if !bearer_mode {
            self.remember(service, &credential);
        }
        Some(credential)
    }

    /// Password for `(service, username)`, cache first.
    ///
    /// An empty `username` accepts whatever username the credential carries.
    pub fn lookup_password(&self, service: &str, username: &str) -> Option<String> {
        let normalized = feed::normalize(service);

        if !self.settings.use_bearer_token {
            // Credentials are remembered under the username they were issued for
            let cached_username = if username.is_empty() {
                self.settings.username.as_str()
            } else {
                username
            };
            let key = (normalized.clone(), cached_username.to_string());
            // Clone out so no shard lock is held while the hook runs
            if let Some(secret) = self.cache.get(&key).map(|entry| entry.value().clone()) {
                tracing::debug!(service = %feed::redact(&normalized), username = %cached_username, "Password found in cache");
                self.diagnostics.emit(Diagnostic::CacheHit {
                    service: feed::redact(&normalized),
                    username: cached_username.to_string(),
                });
                return Some(secret.expose().to_string());
            }
        }

        let credential = self.resolve_credential(&normalized, username)?;
        if username.is_empty() || credential.username == username {
            Some(credential.secret.into_inner())
        } else {
            tracing::debug!(
                service = %feed::redact(&normalized),
                requested = %username,
                provided = %credential.username,
                "Credential is for a different username"
            );
            None
        }
    }

    /// A stored secret that still passes the probe under the configured
    /// policy.
    fn stored_credential(&self, service: &str, username: &str) -> Option<FeedCredential> {
        let stored = match self.local_backend().get_password(service, username) {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(service = %feed::redact(service), username = %username, error = %e, "Local store lookup failed");
                return None;
            }
        };

        let credential = FeedCredential::new(username, stored, CredentialSource::LocalStore);
        let outcome = self.provider.probe(service, Some(&credential));
        let keep = match self.settings.stored_credential_policy {
            StoredCredentialPolicy::Revalidate => outcome.is_authorized(),
            StoredCredentialPolicy::TrustWhenUnreachable => !matches!(outcome, ProbeOutcome::Rejected(_)),
        };

        if !keep {
            tracing::debug!(service = %feed::redact(service), username = %username, outcome = ?outcome, "Stored credential no longer valid");
            self.diagnostics.emit(Diagnostic::StoredCredentialRejected {
                service: feed::redact(service),
                username: username.to_string(),
            });
            return None;
        }

        tracing::debug!(service = %feed::redact(service), username = %username, "Using stored credentials");
        self.diagnostics.emit(Diagnostic::StoredCredentialAccepted {
            service: feed::redact(service),
            username: username.to_string(),
        });
        for key in service_keys(service) {
            self.cache
                .insert((key, credential.username.clone()), credential.secret.clone());
        }
        Some(credential)
    }

    /// Write to the local store and the cache under both service forms.
    fn remember(&self, service: &str, credential: &FeedCredential) {
        for key in service_keys(service) {
            if let Err(e) = self
                .local_backend()
                .set_password(&key, &credential.username, credential.secret.expose())
            {
                tracing::warn!(service = %feed::redact(&key), username = %credential.username, error = %e, "Failed to store credentials");
            }
            self.cache
                .insert((key, credential.username.clone()), credential.secret.clone());
        }
    }
}

/// The service as received, plus its normalized form when different.
fn service_keys(service: &str) -> Vec<String> {
    let normalized = feed::normalize(service);
    if normalized == service {
        vec![normalized]
    } else {
        vec![service.to_string(), normalized]
    }
}

impl KeyringBackend for ArtifactsKeyring {
    fn priority(&self) -> f64 {
        if self.demoted.load(Ordering::SeqCst) {
            DEMOTED_PRIORITY
        } else {
            PRIORITY
        }
    }

    fn get_password(&self, service: &str, username: &str) -> Result<Option<String>, KeyringError> {
        Ok(self.lookup_password(service, username))
    }

    /// Credentials are acquired, never set; the host should use its next
    /// backend.
    fn set_password(&self, service: &str, username: &str, _password: &str) -> Result<(), KeyringError> {
        tracing::debug!(service = %feed::redact(service), username = %username, "set_password is not supported");
        Err(KeyringError::Unsupported)
    }

    fn delete_password(&self, service: &str, username: &str) -> Result<(), KeyringError> {
        let mut result = Ok(());
        for key in service_keys(service) {
            self.cache.remove(&(key.clone(), username.to_string()));
            match self.local_backend().delete_password(&key, username) {
                Ok(()) | Err(KeyringError::NotFound) => {}
                Err(e) => {
                    tracing::warn!(service = %feed::redact(&key), username = %username, error = %e, "Failed to delete stored credentials");
                    result = Err(e);
                }
            }
        }
        result
    }

    fn get_credential(&self, service: &str, username: Option<&str>) -> Result<Option<FeedCredential>, KeyringError> {
        Ok(self.resolve_credential(service, username.unwrap_or_default()))
    }
}
