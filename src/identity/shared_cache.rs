//! Tokens from the MSAL cache shared with developer tools.
//!
//! The cache is a JSON document with `AccessToken`, `RefreshToken` and
//! `Account` sections keyed by opaque cache keys. Numeric fields are stored
//! as strings.

use super::aad::{self, TokenReply};
use super::{IdentityError, IdentitySource, IdentityToken, SourceKind};
use crate::credentials::Secret;
use crate::http::HttpClient;
use crate::provider::Authority;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Access tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// `~/.IdentityService/msal.cache`
pub fn default_cache_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".IdentityService")
        .join("msal.cache")
}

#[derive(Debug, Default, Deserialize)]
struct CacheDocument {
    #[serde(rename = "AccessToken", default)]
    access_tokens: BTreeMap<String, CacheEntry>,
    #[serde(rename = "RefreshToken", default)]
    refresh_tokens: BTreeMap<String, CacheEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct CacheEntry {
    #[serde(default)]
    environment: String,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    secret: String,
    #[serde(default)]
    realm: String,
    #[serde(default)]
    target: String,
    #[serde(default)]
    expires_on: Option<String>,
}

impl CacheEntry {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.expires_on.as_deref()?.trim().parse::<i64>().ok()?;
        DateTime::from_timestamp(secs, 0)
    }
}

pub struct SharedTokenCacheSource {
    http: Arc<dyn HttpClient>,
    authority: Authority,
    cache_path: PathBuf,
}

impl SharedTokenCacheSource {
    pub fn new(http: Arc<dyn HttpClient>, authority: Authority, cache_path: PathBuf) -> Self {
        Self {
            http,
            authority,
            cache_path,
        }
    }

    fn load(&self) -> Result<CacheDocument, IdentityError> {
        let contents = match std::fs::read(&self.cache_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IdentityError::Unavailable(format!(
                    "no shared token cache at {}",
                    self.cache_path.display()
                )))
            }
            Err(e) => {
                return Err(IdentityError::Unavailable(format!(
                    "cannot read shared token cache: {}",
                    e
                )))
            }
        };
        // Platform-encrypted caches are not readable here
        serde_json::from_slice(&contents).map_err(|_| {
            IdentityError::Unavailable("shared token cache is not plain JSON".to_string())
        })
    }

    /// Host of the discovered authority, if any.
    fn authority_host(&self) -> Option<String> {
        url::Url::parse(&self.authority.authority)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
    }

    fn matches_environment(&self, entry: &CacheEntry, host: Option<&str>) -> bool {
        host.map_or(true, |host| entry.environment.eq_ignore_ascii_case(host))
    }

    fn matches_realm(&self, entry: &CacheEntry) -> bool {
        self.authority.tenant_id.is_empty() || entry.realm.eq_ignore_ascii_case(&self.authority.tenant_id)
    }

    fn redeem(&self, entry: &CacheEntry, scope: &str) -> Result<TokenReply, IdentityError> {
        let url = aad::endpoint(&self.authority, None, "token");
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", entry.client_id.as_str()),
            ("refresh_token", entry.secret.as_str()),
            ("scope", scope),
        ];
        aad::request_token(self.http.as_ref(), &url, &form, scope)
    }
}

impl IdentitySource for SharedTokenCacheSource {
    fn kind(&self) -> SourceKind {
        SourceKind::SharedTokenCache
    }

    fn get_token(&self, scope: &str) -> Result<IdentityToken, IdentityError> {
        let cache = self.load()?;
        let host = self.authority_host();
        let resource = scope.trim_end_matches("/.default").to_ascii_lowercase();
        let fresh_until = Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS);

        let candidates: Vec<&CacheEntry> = cache
            .access_tokens
            .values()
            .filter(|entry| self.matches_environment(entry, host.as_deref()))
            .filter(|entry| self.matches_realm(entry))
            .filter(|entry| entry.target.to_ascii_lowercase().contains(&resource))
            .collect();

        let fresh = candidates
            .iter()
            .filter_map(|entry| entry.expires_at().map(|at| (at, *entry)))
            .filter(|(at, _)| *at > fresh_until)
            .max_by_key(|(at, _)| *at);
        if let Some((expires_on, entry)) = fresh {
            tracing::debug!(expires_on = %expires_on, "Using cached access token");
            return Ok(IdentityToken {
                value: Secret::new(entry.secret.clone()),
                scope: scope.to_string(),
                expires_on: Some(expires_on),
            });
        }

        let refresh_tokens: Vec<&CacheEntry> = cache
            .refresh_tokens
            .values()
            .filter(|entry| self.matches_environment(entry, host.as_deref()))
            .filter(|entry| !entry.secret.is_empty())
            .collect();

        let mut last_expired = None;
        for entry in &refresh_tokens {
            match self.redeem(entry, scope)? {
                TokenReply::Issued(token) => return Ok(token),
                TokenReply::Rejected(error) if error.is_expired_grant() || error.error == "invalid_grant" => {
                    tracing::debug!(error = %error.error, "Cached refresh token rejected");
                    last_expired = Some(error.summary());
                }
                TokenReply::Rejected(error) => return Err(error.into_identity_error()),
            }
        }

        if let Some(reason) = last_expired {
            return Err(IdentityError::ExpiredCache(reason));
        }
        if !candidates.is_empty() {
            return Err(IdentityError::ExpiredCache(
                "cached access token expired and no refresh token is available".to_string(),
            ));
        }
        Err(IdentityError::Unavailable(format!(
            "no cached account for {}",
            resource
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ReqwestClient;
    use mockito::{Matcher, Server};
    use serde_json::json;

    const RESOURCE: &str = "499b84ac-1321-427f-aa17-267ca6975798";
    const SCOPE: &str = "499b84ac-1321-427f-aa17-267ca6975798/.default";

    fn write_cache(dir: &tempfile::TempDir, doc: serde_json::Value) -> PathBuf {
        let path = dir.path().join("msal.cache");
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();
        path
    }

    fn source(authority: &str, path: PathBuf) -> SharedTokenCacheSource {
        SharedTokenCacheSource::new(
            Arc::new(ReqwestClient::new().unwrap()),
            Authority {
                authority: authority.to_string(),
                tenant_id: "tenant-1".to_string(),
                exchange_endpoint: String::new(),
            },
            path,
        )
    }

    fn access_token(environment: &str, expires_on: i64) -> serde_json::Value {
        json!({
            "home_account_id": "uid.utid",
            "environment": environment,
            "credential_type": "AccessToken",
            "client_id": "client",
            "secret": "cached-access-token",
            "realm": "tenant-1",
            "target": format!("{}/user_impersonation", RESOURCE),
            "cached_at": "0",
            "expires_on": expires_on.to_string(),
        })
    }

    #[test]
    fn test_missing_cache_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = source("https://login.microsoftonline.com/", dir.path().join("absent.cache"));
        assert!(matches!(source.get_token(SCOPE), Err(IdentityError::Unavailable(_))));
    }

    #[test]
    fn test_encrypted_cache_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("msal.cache");
        std::fs::write(&path, [0x01u8, 0x00, 0xff, 0x13]).unwrap();
        let source = source("https://login.microsoftonline.com/", path);
        assert!(matches!(source.get_token(SCOPE), Err(IdentityError::Unavailable(_))));
    }

    #[test]
    fn test_fresh_access_token_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let expires = Utc::now().timestamp() + 3600;
        let path = write_cache(
            &dir,
            json!({ "AccessToken": { "k1": access_token("login.microsoftonline.com", expires) } }),
        );

        let token = source("https://login.microsoftonline.com/", path).get_token(SCOPE).unwrap();
        assert_eq!(token.value.expose(), "cached-access-token");
        assert_eq!(token.expires_on.unwrap().timestamp(), expires);
    }

    #[test]
    fn test_other_environment_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let expires = Utc::now().timestamp() + 3600;
        let path = write_cache(
            &dir,
            json!({ "AccessToken": { "k1": access_token("login.chinacloudapi.cn", expires) } }),
        );

        let err = source("https://login.microsoftonline.com/", path).get_token(SCOPE).unwrap_err();
        assert!(matches!(err, IdentityError::Unavailable(_)));
    }

    #[test]
    fn test_expired_access_token_without_refresh_is_expired_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cache(
            &dir,
            json!({ "AccessToken": { "k1": access_token("login.microsoftonline.com", 1000) } }),
        );

        let err = source("https://login.microsoftonline.com/", path).get_token(SCOPE).unwrap_err();
        assert!(matches!(err, IdentityError::ExpiredCache(_)));
    }

    #[test]
    fn test_refresh_token_is_redeemed() {
        let mut server = Server::new();
        let host = url::Url::parse(&server.url()).unwrap().host_str().unwrap().to_string();
        let mock = server
            .mock("POST", "/tenant-1/oauth2/v2.0/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "cached-refresh-token".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"refreshed","expires_in":3600}"#)
            .create();

        let dir = tempfile::tempdir().unwrap();
        let path = write_cache(
            &dir,
            json!({ "RefreshToken": { "r1": {
                "environment": host,
                "credential_type": "RefreshToken",
                "client_id": "client",
                "secret": "cached-refresh-token"
            } } }),
        );

        let token = source(&format!("{}/", server.url()), path).get_token(SCOPE).unwrap();
        assert_eq!(token.value.expose(), "refreshed");
        mock.assert();
    }

    #[test]
    fn test_invalid_grant_is_expired_cache() {
        let mut server = Server::new();
        let host = url::Url::parse(&server.url()).unwrap().host_str().unwrap().to_string();
        let _mock = server
            .mock("POST", "/tenant-1/oauth2/v2.0/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"AADSTS70043: The refresh token has expired","error_codes":[70043]}"#)
            .create();

        let dir = tempfile::tempdir().unwrap();
        let path = write_cache(
            &dir,
            json!({ "RefreshToken": { "r1": {
                "environment": host,
                "client_id": "client",
                "secret": "old-refresh-token"
            } } }),
        );

        let err = source(&format!("{}/", server.url()), path).get_token(SCOPE).unwrap_err();
        assert!(matches!(err, IdentityError::ExpiredCache(_)));
    }
}
