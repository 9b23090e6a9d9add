use super::{IdentityError, IdentityToken, SourceFactory, SourceKind};
use crate::config::Settings;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::provider::Authority;

/// Inputs that decide which sources take part in a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainConditions {
    pub environment_configured: bool,
    pub tenant_known: bool,
    pub exclude_shared_token_cache: bool,
    pub browser_available: bool,
    pub non_interactive: bool,
}

impl ChainConditions {
    pub fn evaluate(factory: &dyn SourceFactory, authority: &Authority, settings: &Settings) -> Self {
        Self {
            environment_configured: factory.environment_configured(),
            tenant_known: !authority.tenant_id.is_empty(),
            exclude_shared_token_cache: settings.exclude_shared_token_cache,
            browser_available: factory.browser_available(),
            non_interactive: settings.non_interactive,
        }
    }
}

/// Ordered source list, computed once before any source runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPlan {
    kinds: Vec<SourceKind>,
}

impl ChainPlan {
    pub fn new(conditions: &ChainConditions) -> Self {
        let candidates = [
            (SourceKind::Environment, conditions.environment_configured),
            (SourceKind::AzureCli, conditions.tenant_known),
            (SourceKind::SharedTokenCache, !conditions.exclude_shared_token_cache),
            (
                SourceKind::InteractiveBrowser,
                conditions.browser_available && !conditions.non_interactive,
            ),
            (SourceKind::DeviceCode, !conditions.non_interactive),
        ];

        Self {
            kinds: candidates
                .into_iter()
                .filter_map(|(kind, included)| included.then_some(kind))
                .collect(),
        }
    }

    /// Same plan minus the sources that read cached sign-ins.
    pub fn without_cached(&self) -> Self {
        Self {
            kinds: self
                .kinds
                .iter()
                .copied()
                .filter(|kind| !matches!(kind, SourceKind::AzureCli | SourceKind::SharedTokenCache))
                .collect(),
        }
    }

    pub fn kinds(&self) -> &[SourceKind] {
        &self.kinds
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// One acquisition attempt against a discovered authority.
pub struct IdentityChain<'a> {
    factory: &'a dyn SourceFactory,
    authority: &'a Authority,
    plan: ChainPlan,
    diagnostics: &'a Diagnostics,
}

impl<'a> IdentityChain<'a> {
    pub fn new(
        factory: &'a dyn SourceFactory,
        authority: &'a Authority,
        plan: ChainPlan,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        Self {
            factory,
            authority,
            plan,
            diagnostics,
        }
    }

    pub fn plan(&self) -> &ChainPlan {
        &self.plan
    }

    /// Run the plan. An expired cached sign-in gets exactly one more run
    /// without the cached sources; nothing is retried beyond that.
    pub fn acquire(&self, scope: &str) -> Result<IdentityToken, IdentityError> {
        match self.run(&self.plan, scope) {
            Err(IdentityError::ExpiredCache(reason)) => {
                tracing::warn!(reason = %reason, "Cached sign-in expired, retrying without cached credentials");
                self.diagnostics.emit(Diagnostic::ChainRetry { reason });
                self.run(&self.plan.without_cached(), scope)
            }
            outcome => outcome,
        }
    }

    fn run(&self, plan: &ChainPlan, scope: &str) -> Result<IdentityToken, IdentityError> {
        let mut reasons = Vec::new();

        for &kind in plan.kinds() {
            let source = self.factory.create(kind, self.authority);
            tracing::debug!(source = %kind, "Trying identity source");

            match source.get_token(scope) {
                Ok(token) => {
                    tracing::info!(source = %kind, "Acquired identity token");
                    self.diagnostics.emit(Diagnostic::TokenAcquired { source: kind });
                    return Ok(token);
                }
                Err(IdentityError::Unavailable(reason)) => {
                    tracing::debug!(source = %kind, reason = %reason, "Identity source unavailable");
                    reasons.push(format!("{}: {}", kind, reason));
                    self.diagnostics.emit(Diagnostic::SourceSkipped { source: kind, reason });
                }
                Err(e) => {
                    tracing::debug!(source = %kind, error = %e, "Identity source failed");
                    return Err(e);
                }
            }
        }

        Err(IdentityError::Exhausted(reasons))
    }
}
