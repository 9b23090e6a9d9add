//! Authorization code flow in the system browser.
//!
//! A one-route axum server on the loopback interface receives the redirect.
//! PKCE (S256) binds the code to this process.

use super::aad::{self, TokenReply};
use super::{IdentityError, IdentitySource, IdentityToken, SourceKind};
use crate::http::HttpClient;
use crate::provider::Authority;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Time the browser gets to receive the completion page before shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const COMPLETION_PAGE: &str = "<html><body><p>Authentication complete. You can close this window.</p></body></html>";
const UNEXPECTED_STATE_PAGE: &str =
    "<html><body><p>This sign-in response does not belong to the pending request.</p></body></html>";

/// Whether a browser can be launched from this process.
pub fn is_browser_available() -> bool {
    if std::env::var("BROWSER").is_ok_and(|v| !v.trim().is_empty()) {
        return true;
    }
    if cfg!(any(target_os = "macos", windows)) {
        return true;
    }
    let has_display = ["DISPLAY", "WAYLAND_DISPLAY"]
        .iter()
        .any(|name| std::env::var(name).is_ok_and(|v| !v.is_empty()));
    has_display && find_on_path("xdg-open")
}

fn find_on_path(program: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| is_file(&dir.join(program))))
        .unwrap_or(false)
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

fn launch(url: &str) -> std::io::Result<()> {
    let mut command = match std::env::var("BROWSER").ok().filter(|v| !v.trim().is_empty()) {
        Some(browser) => {
            let mut command = Command::new(browser.trim());
            command.arg(url);
            command
        }
        None if cfg!(target_os = "macos") => {
            let mut command = Command::new("open");
            command.arg(url);
            command
        }
        None if cfg!(windows) => {
            let mut command = Command::new("rundll32");
            command.args(["url.dll,FileProtocolHandler", url]);
            command
        }
        None => {
            let mut command = Command::new("xdg-open");
            command.arg(url);
            command
        }
    };
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
}

/// Query parameters of the redirect back to the loopback listener.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
pub struct AuthorizationCallback {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// PKCE verifier and its S256 challenge.
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::random();
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    fn from_verifier(verifier: String) -> Self {
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self { verifier, challenge }
    }
}

pub struct InteractiveBrowserSource {
    http: Arc<dyn HttpClient>,
    authority: Authority,
    client_id: String,
    timeout: Duration,
}

impl InteractiveBrowserSource {
    pub fn new(http: Arc<dyn HttpClient>, authority: Authority, client_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            authority,
            client_id: client_id.into(),
            timeout,
        }
    }

    fn authorize_url(&self, redirect_uri: &str, scope: &str, state: &str, pkce: &Pkce) -> String {
        format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&response_mode=query&scope={}&state={}&code_challenge={}&code_challenge_method=S256&prompt=select_account",
            aad::endpoint(&self.authority, None, "authorize"),
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(scope),
            urlencoding::encode(state),
            urlencoding::encode(&pkce.challenge),
        )
    }
}

impl IdentitySource for InteractiveBrowserSource {
    fn kind(&self) -> SourceKind {
        SourceKind::InteractiveBrowser
    }

    fn get_token(&self, scope: &str) -> Result<IdentityToken, IdentityError> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .map_err(|e| IdentityError::Unavailable(format!("cannot open loopback listener: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| IdentityError::Unavailable(format!("cannot open loopback listener: {}", e)))?
            .port();
        let redirect_uri = format!("http://localhost:{}", port);

        let pkce = Pkce::generate();
        let state = uuid::Uuid::new_v4().to_string();
        let url = self.authorize_url(&redirect_uri, scope, &state, &pkce);

        tracing::info!(port, "Opening browser for sign-in");
        launch(&url).map_err(|e| IdentityError::Unavailable(format!("cannot launch browser: {}", e)))?;

        let callback = wait_for_callback(listener, &state, self.timeout)?;
        if let Some(error) = callback.error {
            let description = callback.error_description.unwrap_or_default();
            return Err(IdentityError::Authentication(format!("{}: {}", error, description)));
        }
        let code = callback
            .code
            .ok_or_else(|| IdentityError::Authentication("browser redirect carried no code".to_string()))?;

        let token_url = aad::endpoint(&self.authority, None, "token");
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
            ("scope", scope),
        ];
        match aad::request_token(self.http.as_ref(), &token_url, &form, scope)? {
            TokenReply::Issued(token) => Ok(token),
            TokenReply::Rejected(error) => Err(IdentityError::Authentication(error.summary())),
        }
    }
}

/// Shared with the callback handler.
struct CallbackState {
    expected_state: String,
    sender: Mutex<Option<oneshot::Sender<AuthorizationCallback>>>,
}

/// GET /?code=...&state=... (or ?error=...)
async fn receive_callback(
    State(state): State<Arc<CallbackState>>,
    Query(callback): Query<AuthorizationCallback>,
) -> (StatusCode, Html<&'static str>) {
    if callback.code.is_none() && callback.error.is_none() {
        return (StatusCode::NOT_FOUND, Html(""));
    }
    if callback.state.as_deref() != Some(state.expected_state.as_str()) {
        tracing::debug!("Ignoring browser redirect with unexpected state");
        return (StatusCode::BAD_REQUEST, Html(UNEXPECTED_STATE_PAGE));
    }

    let sender = state
        .sender
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(callback);
    }
    (StatusCode::OK, Html(COMPLETION_PAGE))
}

/// Serve the redirect endpoint on `listener` until a redirect carrying
/// `expected_state` arrives or `timeout` elapses.
///
/// Redirects with any other state are answered and ignored.
pub fn wait_for_callback(
    listener: TcpListener,
    expected_state: &str,
    timeout: Duration,
) -> Result<AuthorizationCallback, IdentityError> {
    let listener_error = |e: std::io::Error| IdentityError::Unavailable(format!("loopback listener: {}", e));

    listener.set_nonblocking(true).map_err(listener_error)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(listener_error)?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::from_std(listener).map_err(listener_error)?;
        let (callback_tx, callback_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let app = Router::new()
            .route("/", get(receive_callback))
            .with_state(Arc::new(CallbackState {
                expected_state: expected_state.to_string(),
                sender: Mutex::new(Some(callback_tx)),
            }));
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let outcome = tokio::time::timeout(timeout, callback_rx).await;
        let _ = shutdown_tx.send(());
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, server).await;

        match outcome {
            Ok(Ok(callback)) => Ok(callback),
            Ok(Err(_)) => Err(IdentityError::Authentication(
                "loopback listener stopped before the redirect arrived".to_string(),
            )),
            Err(_) => Err(IdentityError::Timeout(timeout)),
        }
    })
}
