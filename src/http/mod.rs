//! Blocking HTTP transport.
//!
//! Discovery, the validation probe, the token exchange and the OAuth sources
//! all talk HTTP through [`HttpClient`], so tests can substitute a scripted
//! client and production uses [`ReqwestClient`].

use crate::feed::redact;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

#[cfg(test)]
pub(crate) mod testing;

const USER_AGENT: &str = concat!("artifacts-keyring/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP Basic credentials for the feed probe
#[derive(Clone, Copy)]
pub struct BasicAuth<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

impl std::fmt::Debug for BasicAuth<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Status, headers (lower-cased names) and body of a completed request.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).context("Failed to parse response body as JSON")
    }
}

pub trait HttpClient: Send + Sync {
    /// GET with optional Basic credentials.
    fn get(&self, url: &str, auth: Option<BasicAuth<'_>>) -> Result<HttpResponse>;

    /// POST a JSON body with a bearer token.
    fn post_json(&self, url: &str, bearer_token: &str, body: &serde_json::Value) -> Result<HttpResponse>;

    /// POST an `application/x-www-form-urlencoded` body.
    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse>;
}

/// [`HttpClient`] backed by `reqwest`'s blocking client.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    fn read(response: reqwest::blocking::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .map_err(reqwest::Error::without_url)
            .context("Failed to read response body")?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, auth: Option<BasicAuth<'_>>) -> Result<HttpResponse> {
        let mut request = self.client.get(url);
        if let Some(auth) = auth {
            request = request.basic_auth(auth.username, Some(auth.password));
        }
        let response = request
            .send()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("GET {} failed", redact(url)))?;
        Self::read(response)
    }

    fn post_json(&self, url: &str, bearer_token: &str, body: &serde_json::Value) -> Result<HttpResponse> {
        let response = self
            .client
            .post(url)
            .bearer_auth(bearer_token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("POST {} failed", redact(url)))?;
        Self::read(response)
    }

    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse> {
        let response = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("POST {} failed", redact(url)))?;
        Self::read(response)
    }
}
