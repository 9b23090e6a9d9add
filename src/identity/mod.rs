//! Identity (bearer) token acquisition.
//!
//! Sources are tried in a fixed priority order until one yields a token:
//!
//! ```text
//! Environment ─▶ Azure CLI ─▶ Shared token cache ─▶ Browser ─▶ Device code
//!  (client id)    (tenant)     (not excluded)        (launcher)  (interactive)
//! ```
//!
//! Which sources take part is decided once, up front, by [`ChainPlan`].
//! A source that cannot run in this environment reports
//! [`IdentityError::Unavailable`] and the chain moves on; any other error
//! aborts, except [`IdentityError::ExpiredCache`], which triggers exactly one
//! retry without the CLI and the shared cache.

use crate::credentials::Secret;
use crate::provider::Authority;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

mod aad;
mod azure_cli;
mod browser;
mod chain;
mod device_code;
mod environment;
mod factory;
mod shared_cache;

#[cfg(test)]
pub(crate) mod testing;

pub use azure_cli::AzureCliSource;
pub use browser::{is_browser_available, InteractiveBrowserSource};
pub use chain::{ChainConditions, ChainPlan, IdentityChain};
pub use device_code::DeviceCodeSource;
pub use environment::EnvironmentSource;
pub use factory::AzureSourceFactory;
pub use shared_cache::{default_cache_path, SharedTokenCacheSource};

/// Azure DevOps resource, `.default` scope.
pub const AZURE_DEVOPS_SCOPE: &str = "499b84ac-1321-427f-aa17-267ca6975798/.default";

/// Public client used for the browser and device-code flows.
pub const PUBLIC_CLIENT_ID: &str = "872cd9fa-d31f-45e0-9eab-6e460a02d1f1";

/// Identity source types, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Environment,
    AzureCli,
    SharedTokenCache,
    InteractiveBrowser,
    DeviceCode,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Environment => "environment",
            SourceKind::AzureCli => "azure-cli",
            SourceKind::SharedTokenCache => "shared-token-cache",
            SourceKind::InteractiveBrowser => "interactive-browser",
            SourceKind::DeviceCode => "device-code",
        };
        f.write_str(name)
    }
}

/// Bearer token from one identity source.
#[derive(Debug, Clone)]
pub struct IdentityToken {
    pub value: Secret,
    pub scope: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl IdentityToken {
    pub fn new(value: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            value: Secret::new(value),
            scope: scope.into(),
            expires_on: None,
        }
    }
}

/// Identity acquisition errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Source cannot run here (not installed, not signed in, no cache entry)
    Unavailable(String),
    /// A cached credential exists but has expired
    ExpiredCache(String),
    /// The identity provider refused the request
    Authentication(String),
    /// The user did not finish an interactive flow in time
    Timeout(Duration),
    /// Every source in the chain was unavailable
    Exhausted(Vec<String>),
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::Unavailable(reason) => write!(f, "Credential unavailable: {}", reason),
            IdentityError::ExpiredCache(reason) => write!(f, "Cached credential expired: {}", reason),
            IdentityError::Authentication(reason) => write!(f, "Authentication failed: {}", reason),
            IdentityError::Timeout(after) => {
                write!(f, "Interactive authentication timed out after {}s", after.as_secs())
            }
            IdentityError::Exhausted(reasons) => {
                write!(f, "No identity source could provide a token")?;
                if !reasons.is_empty() {
                    write!(f, " ({})", reasons.join("; "))?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for IdentityError {}

pub trait IdentitySource: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn get_token(&self, scope: &str) -> Result<IdentityToken, IdentityError>;
}

/// Builds sources for a discovered authority.
pub trait SourceFactory: Send + Sync {
    /// Whether a service principal is configured in the environment.
    fn environment_configured(&self) -> bool;

    /// Whether an interactive browser can be launched.
    fn browser_available(&self) -> bool;

    fn create(&self, kind: SourceKind, authority: &Authority) -> Box<dyn IdentitySource>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_debug_redacts_value() {
        let token = IdentityToken::new("eyJ0eXAi.secret", AZURE_DEVOPS_SCOPE);
        let debug = format!("{:?}", token);
        assert!(!debug.contains("eyJ0eXAi"));
        assert!(debug.contains(AZURE_DEVOPS_SCOPE));
    }

    #[test]
    fn test_error_display() {
        let err = IdentityError::Exhausted(vec!["azure-cli: not installed".to_string()]);
        assert_eq!(
            err.to_string(),
            "No identity source could provide a token (azure-cli: not installed)"
        );
        assert_eq!(
            IdentityError::Timeout(Duration::from_secs(90)).to_string(),
            "Interactive authentication timed out after 90s"
        );
    }
}
