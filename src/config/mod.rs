use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Long-lived token that short-circuits acquisition entirely.
pub const PAT_ENV_VAR: &str = "AZURE_DEVOPS_EXT_PAT";
/// Username reported alongside acquired credentials.
pub const USERNAME_ENV_VAR: &str = "AZURE_DEVOPS_USERNAME";
/// Scope requested when exchanging a bearer token.
pub const PAT_SCOPE_ENV_VAR: &str = "AZURE_DEVOPS_PAT_SCOPE";
/// Validity of the exchanged token, in days.
pub const PAT_DURATION_ENV_VAR: &str = "AZURE_DEVOPS_PAT_DURATION";
/// Bearer-only mode: no exchange, no persistence.
pub const USE_BEARER_TOKEN_ENV_VAR: &str = "KEYRINGS_ARTIFACTS_USE_BEARER_TOKEN";
/// Drops the browser and device-code sources from the chain.
pub const NON_INTERACTIVE_ENV_VAR: &str = "KEYRINGS_ARTIFACTS_NONINTERACTIVE_MODE";
/// Drops the shared MSAL token cache source from the chain.
pub const EXCLUDE_SHARED_CACHE_ENV_VAR: &str = "MSAL_EXCLUDE_SHARED_TOKEN_CACHE";
pub const DEVICE_CODE_TIMEOUT_ENV_VAR: &str = "KEYRINGS_ARTIFACTS_DEVICE_CODE_TIMEOUT";
pub const STORED_CREDENTIAL_POLICY_ENV_VAR: &str = "KEYRINGS_ARTIFACTS_STORED_CREDENTIAL_POLICY";
pub const STORE_PATH_ENV_VAR: &str = "KEYRINGS_ARTIFACTS_STORE_PATH";

/// Longest lifetime requested for an exchanged token (ten years).
pub const MAX_PAT_DURATION_DAYS: i64 = 3650;
/// Longest wait for an interactive sign-in.
pub const MAX_INTERACTIVE_TIMEOUT_SECS: u64 = 3600;

/// What to do with a stored credential when the validation probe cannot
/// reach the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoredCredentialPolicy {
    /// Anything but a successful probe re-acquires.
    #[default]
    Revalidate,
    /// Keep the stored credential when the feed is unreachable or failing
    /// with a server error; only 401/403 re-acquires.
    TrustWhenUnreachable,
}

impl FromStr for StoredCredentialPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "revalidate" => Ok(Self::Revalidate),
            "trust-when-unreachable" | "trust_when_unreachable" => Ok(Self::TrustWhenUnreachable),
            other => Err(format!("unknown stored credential policy: {}", other)),
        }
    }
}

/// Complete keyring configuration.
///
/// Built from defaults, an optional TOML file, then environment overrides.
/// The engine reads it once at construction; nothing below re-reads the
/// environment for these values.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Long-lived token from the environment (never logged)
    #[serde(default)]
    pub pat: Option<String>,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_pat_scope")]
    pub pat_scope: String,
    #[serde(default = "default_pat_duration_days")]
    pub pat_duration_days: i64,
    #[serde(default)]
    pub use_bearer_token: bool,
    #[serde(default)]
    pub non_interactive: bool,
    #[serde(default)]
    pub exclude_shared_token_cache: bool,
    /// Upper bound for the device-code and browser flows (seconds)
    #[serde(default = "default_device_code_timeout_secs")]
    pub device_code_timeout_secs: u64,
    #[serde(default)]
    pub stored_credential_policy: StoredCredentialPolicy,
    /// Encrypted store location; `None` uses the platform data directory
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_username() -> String {
    "VssSessionToken".to_string()
}

fn default_pat_scope() -> String {
    "vso.packaging_write".to_string()
}

fn default_pat_duration_days() -> i64 {
    365
}

fn default_device_code_timeout_secs() -> u64 {
    180
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pat: None,
            username: default_username(),
            pat_scope: default_pat_scope(),
            pat_duration_days: default_pat_duration_days(),
            use_bearer_token: false,
            non_interactive: false,
            exclude_shared_token_cache: false,
            device_code_timeout_secs: default_device_code_timeout_secs(),
            stored_credential_policy: StoredCredentialPolicy::default(),
            store_path: None,
        }
    }
}

impl Settings {
    /// Build from env vars, falling back to defaults.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup` on top of `self`.
    ///
    /// Unparsable values are ignored with a warning so a typo in one variable
    /// does not disable the keyring.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(PAT_ENV_VAR).filter(|v| !v.is_empty()) {
            self.pat = Some(v);
        }
        if let Some(v) = lookup(USERNAME_ENV_VAR).filter(|v| !v.is_empty()) {
            self.username = v;
        }
        if let Some(v) = lookup(PAT_SCOPE_ENV_VAR).filter(|v| !v.is_empty()) {
            self.pat_scope = v;
        }
        if let Some(v) = lookup(PAT_DURATION_ENV_VAR) {
            match v.trim().parse::<i64>() {
                Ok(days) if (1..=MAX_PAT_DURATION_DAYS).contains(&days) => self.pat_duration_days = days,
                _ => tracing::warn!(var = PAT_DURATION_ENV_VAR, value = %v, "Ignoring invalid token duration"),
            }
        }
        if let Some(v) = lookup(USE_BEARER_TOKEN_ENV_VAR) {
            self.use_bearer_token = parse_flag(&v);
        }
        if let Some(v) = lookup(NON_INTERACTIVE_ENV_VAR) {
            self.non_interactive = parse_flag(&v);
        }
        if let Some(v) = lookup(EXCLUDE_SHARED_CACHE_ENV_VAR) {
            self.exclude_shared_token_cache = parse_flag(&v);
        }
        if let Some(v) = lookup(DEVICE_CODE_TIMEOUT_ENV_VAR) {
            match v.trim().parse::<u64>() {
                Ok(secs) if (1..=MAX_INTERACTIVE_TIMEOUT_SECS).contains(&secs) => {
                    self.device_code_timeout_secs = secs
                }
                _ => tracing::warn!(var = DEVICE_CODE_TIMEOUT_ENV_VAR, value = %v, "Ignoring invalid timeout"),
            }
        }
        if let Some(v) = lookup(STORED_CREDENTIAL_POLICY_ENV_VAR) {
            match v.parse() {
                Ok(policy) => self.stored_credential_policy = policy,
                Err(e) => tracing::warn!(var = STORED_CREDENTIAL_POLICY_ENV_VAR, error = %e, "Ignoring invalid policy"),
            }
        }
        if let Some(v) = lookup(STORE_PATH_ENV_VAR).filter(|v| !v.is_empty()) {
            self.store_path = Some(PathBuf::from(v));
        }
        self
    }

    /// Replace out-of-range numeric fields with their defaults.
    ///
    /// Applied to values read from a file; environment overrides are checked
    /// as they are parsed.
    pub fn validated(mut self) -> Self {
        if !(1..=MAX_PAT_DURATION_DAYS).contains(&self.pat_duration_days) {
            tracing::warn!(
                value = self.pat_duration_days,
                max = MAX_PAT_DURATION_DAYS,
                "Ignoring out-of-range pat_duration_days"
            );
            self.pat_duration_days = default_pat_duration_days();
        }
        if !(1..=MAX_INTERACTIVE_TIMEOUT_SECS).contains(&self.device_code_timeout_secs) {
            tracing::warn!(
                value = self.device_code_timeout_secs,
                max = MAX_INTERACTIVE_TIMEOUT_SECS,
                "Ignoring out-of-range device_code_timeout_secs"
            );
            self.device_code_timeout_secs = default_device_code_timeout_secs();
        }
        self
    }

    /// `None` when the configured day count does not fit a `TimeDelta`.
    pub fn pat_duration(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_days(self.pat_duration_days)
    }

    pub fn device_code_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.device_code_timeout_secs)
    }
}

/// `true`/`1` (any case) enable a flag; everything else disables it.
pub fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Load settings from a TOML file, then apply environment overrides.
pub fn load_settings<P: AsRef<Path>>(path: P) -> anyhow::Result<Settings> {
    use anyhow::Context;

    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let settings: Settings = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(settings
        .validated()
        .with_overrides(|name| std::env::var(name).ok()))
}
