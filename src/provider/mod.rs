//! Credential provider for Azure Artifacts feeds.
//!
//! Composes the pieces of one acquisition attempt:
//!
//! 1. Public feed check (skipped for upload endpoints)
//! 2. Long-lived token from the environment
//! 3. Authority discovery, identity chain, token exchange
//! 4. Validation probe of the result

use crate::config::Settings;
use crate::credentials::{CredentialSource, FeedCredential};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::feed;
use crate::http::HttpClient;
use crate::identity::{ChainConditions, ChainPlan, IdentityChain, SourceFactory, AZURE_DEVOPS_SCOPE};
use anyhow::{Context, Result};
use std::sync::Arc;

pub mod discovery;
pub mod exchange;
pub mod probe;


pub use discovery::{discover, Authority};
pub use exchange::exchange_bearer_for_pat;
pub use probe::ProbeOutcome;

pub trait CredentialProvider: Send + Sync {
    /// Credentials for `url`.
    ///
    /// `Ok(None)` means the feed needs none (it is public) or the acquired
    /// credential did not authorize. `Err` is a failed attempt.
    fn get_credentials(&self, url: &str) -> Result<Option<FeedCredential>>;

    fn probe(&self, url: &str, credential: Option<&FeedCredential>) -> ProbeOutcome;

    fn can_authenticate(&self, url: &str, credential: Option<&FeedCredential>) -> bool {
        self.probe(url, credential).is_authorized()
    }
}

/// Production provider: HTTP against the feed and the identity chain.
pub struct FeedCredentialProvider {
    http: Arc<dyn HttpClient>,
    sources: Arc<dyn SourceFactory>,
    settings: Settings,
    diagnostics: Diagnostics,
}

impl FeedCredentialProvider {
    pub fn new(http: Arc<dyn HttpClient>, sources: Arc<dyn SourceFactory>, settings: Settings) -> Self {
        Self {
            http,
            sources,
            settings,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Discovery, identity chain, then exchange (or passthrough in
    /// bearer-only mode).
    fn acquire(&self, url: &str) -> Result<FeedCredential> {
        let authority = discover(self.http.as_ref(), url);
        let conditions = ChainConditions::evaluate(self.sources.as_ref(), &authority, &self.settings);
        let plan = ChainPlan::new(&conditions);
        tracing::debug!(url = %feed::redact(url), plan = ?plan.kinds(), "Running identity chain");

        let chain = IdentityChain::new(self.sources.as_ref(), &authority, plan, &self.diagnostics);
        let token = chain
            .acquire(AZURE_DEVOPS_SCOPE)
            .context("Failed to acquire an identity token")?;

        if self.settings.use_bearer_token {
            return Ok(FeedCredential {
                username: self.settings.username.clone(),
                secret: token.value,
                source: CredentialSource::BearerPassthrough,
            });
        }

        let valid_for = self
            .settings
            .pat_duration()
            .context("Configured token lifetime is out of range")?;
        let pat = exchange_bearer_for_pat(
            self.http.as_ref(),
            &authority.exchange_endpoint,
            &token.value,
            &self.settings.pat_scope,
            valid_for,
        )?;
        self.diagnostics.emit(Diagnostic::TokenExchanged {
            endpoint: authority.exchange_endpoint.clone(),
        });

        Ok(FeedCredential {
            username: self.settings.username.clone(),
            secret: pat,
            source: CredentialSource::ExchangedToken,
        })
    }
}

impl CredentialProvider for FeedCredentialProvider {
    fn get_credentials(&self, url: &str) -> Result<Option<FeedCredential>> {
        // Upload always requires authentication
        if !feed::is_upload_endpoint(url) && self.can_authenticate(url, None) {
            tracing::debug!(url = %feed::redact(url), "Feed is public, no credentials needed");
            self.diagnostics.emit(Diagnostic::PublicFeed { service: feed::redact(url) });
            return Ok(None);
        }

        if let Some(pat) = self.settings.pat.as_deref().filter(|_| !self.settings.use_bearer_token) {
            tracing::debug!(url = %feed::redact(url), username = %self.settings.username, "Using long-lived token from environment");
            self.diagnostics.emit(Diagnostic::EnvironmentToken { service: feed::redact(url) });
            return Ok(Some(FeedCredential::new(
                self.settings.username.clone(),
                pat,
                CredentialSource::Environment,
            )));
        }

        let credential = self.acquire(url)?;

        if self.can_authenticate(url, Some(&credential)) {
            Ok(Some(credential))
        } else {
            tracing::warn!(url = %feed::redact(url), username = %credential.username, "Acquired credential was not accepted by the feed");
            self.diagnostics.emit(Diagnostic::CredentialInvalid { service: feed::redact(url) });
            Ok(None)
        }
    }

    fn probe(&self, url: &str, credential: Option<&FeedCredential>) -> ProbeOutcome {
        probe::probe(self.http.as_ref(), url, credential)
    }
}
