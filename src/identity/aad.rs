//! Azure AD v2.0 endpoint helpers shared by the OAuth sources.

use super::{IdentityError, IdentityToken};
use crate::http::HttpClient;
use crate::provider::Authority;
use chrono::{Duration, Utc};
use serde::Deserialize;

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/";
pub const DEFAULT_TENANT: &str = "organizations";

/// AADSTS codes that mean "the cached grant is too old, sign in again".
const EXPIRED_GRANT_CODES: [i64; 4] = [50173, 70008, 70043, 700082];

/// `{authority}{tenant}/oauth2/v2.0/{path}`.
///
/// `tenant_override` wins over the discovered tenant; with neither the
/// multi-tenant `organizations` endpoint is used.
pub fn endpoint(authority: &Authority, tenant_override: Option<&str>, path: &str) -> String {
    let base = non_empty(&authority.authority).unwrap_or(DEFAULT_AUTHORITY);
    let tenant = tenant_override
        .and_then(non_empty)
        .or_else(|| non_empty(&authority.tenant_id))
        .unwrap_or(DEFAULT_TENANT);
    format!("{}/{}/oauth2/v2.0/{}", base.trim_end_matches('/'), tenant, path)
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Error body returned by the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AadError {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_codes: Vec<i64>,
}

impl AadError {
    pub fn is_expired_grant(&self) -> bool {
        self.error_codes.iter().any(|code| EXPIRED_GRANT_CODES.contains(code))
            || (self.error == "invalid_grant"
                && self
                    .error_description
                    .as_deref()
                    .is_some_and(|d| d.to_ascii_lowercase().contains("expired")))
    }

    /// First line of the description, or the error code.
    pub fn summary(&self) -> String {
        match self.error_description.as_deref().and_then(|d| d.lines().next()) {
            Some(line) if !line.trim().is_empty() => format!("{}: {}", self.error, line.trim()),
            _ => self.error.clone(),
        }
    }

    pub fn into_identity_error(self) -> IdentityError {
        if self.is_expired_grant() {
            IdentityError::ExpiredCache(self.summary())
        } else {
            IdentityError::Authentication(self.summary())
        }
    }
}

/// Outcome of a token endpoint call that reached the server.
#[derive(Debug)]
pub enum TokenReply {
    Issued(IdentityToken),
    Rejected(AadError),
}

/// POST a form to a token endpoint.
///
/// Transport failures and unreadable bodies become
/// [`IdentityError::Authentication`]; an OAuth error body is handed back as
/// [`TokenReply::Rejected`] so callers can act on codes such as
/// `authorization_pending`.
pub fn request_token(
    http: &dyn HttpClient,
    url: &str,
    form: &[(&str, &str)],
    scope: &str,
) -> Result<TokenReply, IdentityError> {
    let response = http
        .post_form(url, form)
        .map_err(|e| IdentityError::Authentication(format!("token request failed: {:#}", e)))?;

    if response.is_success() {
        let token: TokenResponse = response.json().map_err(|_| {
            IdentityError::Authentication(format!("malformed token response from {}", url))
        })?;
        return Ok(TokenReply::Issued(IdentityToken {
            value: crate::credentials::Secret::new(token.access_token),
            scope: scope.to_string(),
            expires_on: token
                .expires_in
                .and_then(Duration::try_seconds)
                .and_then(|lifetime| Utc::now().checked_add_signed(lifetime)),
        }));
    }

    match response.json::<AadError>() {
        Ok(error) => Ok(TokenReply::Rejected(error)),
        Err(_) => Err(IdentityError::Authentication(format!(
            "token endpoint {} returned status {}",
            url, response.status
        ))),
    }
}
