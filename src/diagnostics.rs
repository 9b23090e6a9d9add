//! Structured diagnostic events.
//!
//! Every event is also emitted as a `tracing` debug event. Hosts that want to
//! surface resolution progress (or silence it) register a hook instead of
//! reconfiguring global logger state. Events carry structural context only:
//! URLs, usernames, source names. Never secret values.

use crate::identity::SourceKind;
use std::fmt;
use std::sync::Arc;

/// One step of a credential resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    UnsupportedHost { service: String },
    CacheHit { service: String, username: String },
    StoredCredentialAccepted { service: String, username: String },
    StoredCredentialRejected { service: String, username: String },
    PublicFeed { service: String },
    EnvironmentToken { service: String },
    SourceSkipped { source: SourceKind, reason: String },
    ChainRetry { reason: String },
    TokenAcquired { source: SourceKind },
    TokenExchanged { endpoint: String },
    CredentialInvalid { service: String },
    AcquisitionFailed { service: String, error: String },
}

pub type DiagnosticHook = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

/// Cheap-to-clone handle around an optional hook.
#[derive(Clone, Default)]
pub struct Diagnostics {
    hook: Option<DiagnosticHook>,
}

impl Diagnostics {
    pub fn new(hook: DiagnosticHook) -> Self {
        Self { hook: Some(hook) }
    }

    pub fn emit(&self, event: Diagnostic) {
        tracing::debug!(event = ?event, "diagnostic");
        if let Some(hook) = &self.hook {
            hook(&event);
        }
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("hook", &self.hook.is_some())
            .finish()
    }
}
