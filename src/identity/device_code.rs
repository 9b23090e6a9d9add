//! Device authorization grant (RFC 8628).
//!
//! The user is told on stderr where to enter a code; this process polls the
//! token endpoint until they do, the code expires, or the timeout elapses.

use super::aad::{self, TokenReply};
use super::{IdentityError, IdentitySource, IdentityToken, SourceKind};
use crate::http::HttpClient;
use crate::provider::Authority;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
/// Added to the polling interval on every `slow_down`.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

type Prompt = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Deserialize)]
struct DeviceAuthorization {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
    #[serde(default)]
    message: Option<String>,
}

fn default_expires_in() -> u64 {
    900
}

fn default_interval() -> u64 {
    5
}

impl DeviceAuthorization {
    fn prompt_text(&self) -> String {
        self.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, use a web browser to open the page {} and enter the code {} to authenticate.",
                self.verification_uri, self.user_code
            )
        })
    }
}

pub struct DeviceCodeSource {
    http: Arc<dyn HttpClient>,
    authority: Authority,
    client_id: String,
    timeout: Duration,
    prompt: Prompt,
}

impl DeviceCodeSource {
    pub fn new(http: Arc<dyn HttpClient>, authority: Authority, client_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            authority,
            client_id: client_id.into(),
            timeout,
            prompt: Arc::new(|message| eprintln!("{}", message)),
        }
    }

    /// Replace the stderr prompt.
    pub fn with_prompt(mut self, prompt: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.prompt = Arc::new(prompt);
        self
    }

    fn authorize(&self, scope: &str) -> Result<DeviceAuthorization, IdentityError> {
        let url = aad::endpoint(&self.authority, None, "devicecode");
        let response = self
            .http
            .post_form(&url, &[("client_id", self.client_id.as_str()), ("scope", scope)])
            .map_err(|e| IdentityError::Authentication(format!("device code request failed: {:#}", e)))?;

        if !response.is_success() {
            let reason = response
                .json::<aad::AadError>()
                .map(|e| e.summary())
                .unwrap_or_else(|_| format!("status {}", response.status));
            return Err(IdentityError::Authentication(format!("device code request rejected: {}", reason)));
        }
        response
            .json()
            .map_err(|_| IdentityError::Authentication("malformed device code response".to_string()))
    }
}

impl IdentitySource for DeviceCodeSource {
    fn kind(&self) -> SourceKind {
        SourceKind::DeviceCode
    }

    fn get_token(&self, scope: &str) -> Result<IdentityToken, IdentityError> {
        let authorization = self.authorize(scope)?;
        (self.prompt)(&authorization.prompt_text());

        let bound = self.timeout.min(Duration::from_secs(authorization.expires_in));
        let started = Instant::now();
        let mut interval = Duration::from_secs(authorization.interval);
        let token_url = aad::endpoint(&self.authority, None, "token");

        loop {
            if started.elapsed().saturating_add(interval) >= bound {
                return Err(IdentityError::Timeout(bound));
            }
            std::thread::sleep(interval);

            let form = [
                ("grant_type", DEVICE_CODE_GRANT),
                ("client_id", self.client_id.as_str()),
                ("device_code", authorization.device_code.as_str()),
            ];
            match aad::request_token(self.http.as_ref(), &token_url, &form, scope)? {
                TokenReply::Issued(token) => return Ok(token),
                TokenReply::Rejected(error) => match error.error.as_str() {
                    "authorization_pending" => {}
                    "slow_down" => {
                        interval = interval.saturating_add(SLOW_DOWN_STEP);
                        tracing::debug!(interval_secs = interval.as_secs(), "Device code polling slowed down");
                    }
                    "expired_token" | "code_expired" => return Err(IdentityError::Timeout(bound)),
                    "authorization_declined" | "access_denied" => {
                        return Err(IdentityError::Authentication("sign-in was declined".to_string()))
                    }
                    _ => return Err(IdentityError::Authentication(error.summary())),
                },
            }
        }
    }
}
