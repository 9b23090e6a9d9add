//! Subscriber setup for the `artifacts-keyring` binary.
//!
//! The library never installs a subscriber itself; hosts embedding
//! [`crate::ArtifactsKeyring`] keep control of their own logging.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Log filter, e.g. `debug` or `artifacts_keyring=trace`.
pub const LOG_LEVEL_ENV_VAR: &str = "KEYRINGS_ARTIFACTS_LOGLEVEL";
/// Append logs to this file instead of stderr.
pub const LOG_FILE_ENV_VAR: &str = "KEYRINGS_ARTIFACTS_LOGFILE";

const DEFAULT_FILTER: &str = "warn";

/// Initialize the tracing subscriber from the environment.
///
/// Logs go to stderr so stdout stays reserved for the secret printed by
/// `get`. Calling this twice is harmless; the second call is a no-op.
pub fn init() -> Result<()> {
    let filter = std::env::var(LOG_LEVEL_ENV_VAR)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| v.to_lowercase())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());
    let filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = match std::env::var(LOG_FILE_ENV_VAR).ok().filter(|v| !v.is_empty()) {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
    Ok(())
}
