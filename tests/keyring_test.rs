//! End-to-end resolution against a mock feed, token service and a real
//! encrypted store.

use anyhow::Result;
use artifacts_keyring::http::{BasicAuth, HttpClient, HttpResponse, ReqwestClient};
use artifacts_keyring::identity::{IdentityError, IdentitySource, IdentityToken, SourceFactory, SourceKind};
use artifacts_keyring::provider::Authority;
use artifacts_keyring::{
    ArtifactsKeyring, EncryptedFileStore, FeedCredentialProvider, KeyringBackend, Settings,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use mockito::{Matcher, Mock, Server, ServerGuard};
use std::sync::Arc;

const FEED_HOST: &str = "https://pkgs.dev.azure.com";
const FEED_PATH: &str = "/org/proj/_packaging/feed/pypi/simple";

/// Sends feed requests to the mock server; other URLs pass through.
struct Rerouted {
    base: String,
    inner: ReqwestClient,
}

impl Rerouted {
    fn new(server: &ServerGuard) -> Self {
        Self {
            base: server.url(),
            inner: ReqwestClient::new().unwrap(),
        }
    }

    fn route(&self, url: &str) -> String {
        url.replacen(FEED_HOST, &self.base, 1)
    }
}

impl HttpClient for Rerouted {
    fn get(&self, url: &str, auth: Option<BasicAuth<'_>>) -> Result<HttpResponse> {
        self.inner.get(&self.route(url), auth)
    }

    fn post_json(&self, url: &str, bearer_token: &str, body: &serde_json::Value) -> Result<HttpResponse> {
        self.inner.post_json(&self.route(url), bearer_token, body)
    }

    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse> {
        self.inner.post_form(&self.route(url), form)
    }
}

/// Every source hands out the same identity token.
struct SignedIn;

struct SignedInSource(SourceKind);

impl IdentitySource for SignedInSource {
    fn kind(&self) -> SourceKind {
        self.0
    }

    fn get_token(&self, scope: &str) -> Result<IdentityToken, IdentityError> {
        Ok(IdentityToken::new("aad-token", scope))
    }
}

impl SourceFactory for SignedIn {
    fn environment_configured(&self) -> bool {
        false
    }

    fn browser_available(&self) -> bool {
        false
    }

    fn create(&self, kind: SourceKind, _authority: &Authority) -> Box<dyn IdentitySource> {
        Box::new(SignedInSource(kind))
    }
}

fn feed_url() -> String {
    format!("{}{}", FEED_HOST, FEED_PATH)
}

fn basic(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{}:{}", username, password)))
}

fn engine(server: &ServerGuard, store: &Arc<EncryptedFileStore>) -> ArtifactsKeyring {
    let http: Arc<dyn HttpClient> = Arc::new(Rerouted::new(server));
    let provider = FeedCredentialProvider::new(http, Arc::new(SignedIn), Settings::default());
    ArtifactsKeyring::new(Arc::new(provider), store.clone(), Settings::default())
}

fn private_feed(server: &mut ServerGuard, pat: &str) -> (Mock, Mock) {
    // Any URL under the feed, including package files
    let under_feed = || Matcher::Regex(format!("^{}", FEED_PATH));
    let challenge = server
        .mock("GET", under_feed())
        .match_header("authorization", Matcher::Missing)
        .with_status(401)
        .with_header(
            "WWW-Authenticate",
            "Bearer authorization_uri=https://login.microsoftonline.com/tenant-e2e, Basic realm=\"feed\"",
        )
        .with_header("X-VSS-AuthorizationEndpoint", &format!("{}/vssps/", server.url()))
        .create();
    let authorized = server
        .mock("GET", under_feed())
        .match_header("authorization", basic("VssSessionToken", pat).as_str())
        .with_status(200)
        .create();
    (challenge, authorized)
}

#[test]
fn test_acquires_exchanges_and_persists() {
    let mut server = Server::new();
    let (_challenge, authorized) = private_feed(&mut server, "pat-e2e");
    let exchange = server
        .mock("POST", "/vssps/_apis/tokens/pats")
        .match_query(Matcher::UrlEncoded("api-version".into(), "7.1-preview.1".into()))
        .match_header("authorization", "Bearer aad-token")
        .with_status(200)
        .with_body(r#"{"patToken":{"token":"pat-e2e"}}"#)
        .expect(1)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EncryptedFileStore::with_key(dir.path().join("keyring.db"), [7u8; 32]));

    let keyring = engine(&server, &store);
    assert_eq!(
        keyring.get_password(&feed_url(), "VssSessionToken").unwrap().as_deref(),
        Some("pat-e2e")
    );
    assert_eq!(store.get(&feed_url(), "VssSessionToken").unwrap().as_deref(), Some("pat-e2e"));

    // A new process finds the stored token and only revalidates it
    let restarted = engine(&server, &store);
    assert_eq!(
        restarted.get_password(&feed_url(), "VssSessionToken").unwrap().as_deref(),
        Some("pat-e2e")
    );

    exchange.assert();
    assert!(authorized.matched());
}

#[test]
fn test_public_feed_gets_no_credentials() {
    let mut server = Server::new();
    let _public = server.mock("GET", FEED_PATH).with_status(200).create();

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EncryptedFileStore::with_key(dir.path().join("keyring.db"), [7u8; 32]));

    let keyring = engine(&server, &store);
    assert!(keyring.get_password(&feed_url(), "VssSessionToken").unwrap().is_none());
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn test_delete_removes_persisted_credentials() {
    let mut server = Server::new();
    let _feed = private_feed(&mut server, "pat-del");
    let _exchange = server
        .mock("POST", "/vssps/_apis/tokens/pats")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"patToken":{"token":"pat-del"}}"#)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EncryptedFileStore::with_key(dir.path().join("keyring.db"), [7u8; 32]));
    let keyring = engine(&server, &store);

    let file_url = format!("{}/requests/requests-2.31.0.tar.gz", feed_url());
    keyring.get_credential(&file_url, Some("VssSessionToken")).unwrap().unwrap();
    assert_eq!(store.list().unwrap().len(), 2);

    keyring.delete_password(&file_url, "VssSessionToken").unwrap();
    assert!(store.list().unwrap().is_empty());
}
