//! Bearer token to long-lived token exchange.
//!
//! Handles trading a short-lived identity token for a scoped personal
//! access token at the organization's token service.

use crate::credentials::Secret;
use crate::http::HttpClient;
use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

const EXCHANGE_PATH: &str = "_apis/tokens/pats?api-version=7.1-preview.1";
const DISPLAY_NAME: &str = "Azure DevOps Artifacts Credential Provider";

/// Exchange request body
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PatRequest<'a> {
    display_name: &'a str,
    scope: &'a str,
    valid_to: String,
    all_orgs: bool,
}

/// Exchange response (only the fields we read)
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PatResponse {
    pat_token: PatToken,
}

#[derive(Deserialize)]
struct PatToken {
    token: String,
}

/// Exchange a bearer token for a long-lived token
///
/// # Arguments
/// * `endpoint` - Token service base URL from discovery
/// * `bearer_token` - Identity token (sent as `Authorization: Bearer`)
/// * `scope` - Space-separated scopes of the new token
/// * `valid_for` - Lifetime of the new token
///
/// # Returns
/// * `Ok(Secret)` - The new token
/// * `Err` - Empty endpoint, unrepresentable expiry, transport failure, non-2xx
///   status or malformed body
pub fn exchange_bearer_for_pat(
    http: &dyn HttpClient,
    endpoint: &str,
    bearer_token: &Secret,
    scope: &str,
    valid_for: Duration,
) -> Result<Secret> {
    if endpoint.trim().is_empty() {
        return Err(anyhow!("Feed did not advertise a token exchange endpoint"));
    }
    let url = format!("{}/{}", endpoint.trim().trim_end_matches('/'), EXCHANGE_PATH);

    let valid_to = Utc::now()
        .checked_add_signed(valid_for)
        .ok_or_else(|| anyhow!("Token lifetime of {} days is out of range", valid_for.num_days()))?;
    let request = PatRequest {
        display_name: DISPLAY_NAME,
        scope,
        valid_to: valid_to.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        all_orgs: false,
    };
    let body = serde_json::to_value(&request).context("Failed to encode exchange request")?;

    tracing::debug!(url = %url, scope = %scope, valid_to = %request.valid_to, "Exchanging bearer token");

    let response = http
        .post_json(&url, bearer_token.expose(), &body)
        .context("Failed to send token exchange request")?;

    if !response.is_success() {
        return Err(anyhow!(
            "Token exchange at {} failed with status {}",
            url,
            response.status
        ));
    }

    let parsed: PatResponse = response
        .json()
        .with_context(|| format!("Malformed token exchange response from {}", url))?;

    if parsed.pat_token.token.is_empty() {
        return Err(anyhow!("Token exchange at {} returned an empty token", url));
    }

    tracing::debug!(url = %url, "Token exchange successful");
    Ok(Secret::new(parsed.pat_token.token))
}
