//! Token from a signed-in Azure CLI.

use super::{IdentityError, IdentitySource, IdentityToken, SourceKind};
use crate::credentials::Secret;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::io::ErrorKind;
use std::process::Command;

#[cfg(windows)]
const AZ_PROGRAM: &str = "az.cmd";
#[cfg(not(windows))]
const AZ_PROGRAM: &str = "az";

const EXPIRY_MARKERS: [&str; 4] = ["AADSTS70043", "AADSTS700082", "AADSTS50173", "has expired"];

/// Runs `az account get-access-token` for the discovered tenant.
pub struct AzureCliSource {
    program: String,
    tenant_id: String,
}

impl AzureCliSource {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self::with_program(AZ_PROGRAM, tenant_id)
    }

    pub fn with_program(program: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            tenant_id: tenant_id.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
    /// Epoch seconds, present in newer CLI releases
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

impl IdentitySource for AzureCliSource {
    fn kind(&self) -> SourceKind {
        SourceKind::AzureCli
    }

    fn get_token(&self, scope: &str) -> Result<IdentityToken, IdentityError> {
        let mut command = Command::new(&self.program);
        command.args(["account", "get-access-token", "--output", "json", "--scope", scope]);
        if !self.tenant_id.is_empty() {
            command.args(["--tenant", &self.tenant_id]);
        }

        let output = command.output().map_err(|e| match e.kind() {
            ErrorKind::NotFound => IdentityError::Unavailable("Azure CLI not found on PATH".to_string()),
            _ => IdentityError::Unavailable(format!("failed to run Azure CLI: {}", e)),
        })?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        parse_output(&output.stdout, scope)
    }
}

/// Map CLI stderr onto the error taxonomy.
fn classify_failure(stderr: &str) -> IdentityError {
    let summary = stderr
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("Azure CLI exited with an error")
        .to_string();

    if EXPIRY_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        IdentityError::ExpiredCache(summary)
    } else if stderr.contains("az login") || stderr.contains("az account set") {
        IdentityError::Unavailable("Azure CLI is not signed in; run 'az login'".to_string())
    } else {
        IdentityError::Authentication(summary)
    }
}

fn parse_output(stdout: &[u8], scope: &str) -> Result<IdentityToken, IdentityError> {
    let parsed: CliToken = serde_json::from_slice(stdout)
        .map_err(|_| IdentityError::Authentication("unexpected Azure CLI output".to_string()))?;

    let expires_on = parsed
        .expires_on_epoch
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .or_else(|| parsed.expires_on.as_deref().and_then(parse_local_timestamp));

    Ok(IdentityToken {
        value: Secret::new(parsed.access_token),
        scope: scope.to_string(),
        expires_on,
    })
}

/// `expiresOn` is local time, e.g. `2024-05-01 10:15:30.000000`.
fn parse_local_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}
