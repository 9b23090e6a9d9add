//! Azure Artifacts feed URL classification.
//!
//! Package managers ask for credentials with whatever URL they are about to
//! hit: the index root, a project page, or a concrete wheel file. All of them
//! fold onto one canonical feed URL so a single cache entry serves the feed.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;


/// Host suffixes served by Azure Artifacts.
pub const SUPPORTED_HOSTS: [&str; 4] = [
    "pkgs.dev.azure.com",
    "pkgs.visualstudio.com",
    "pkgs.codedev.ms",
    "pkgs.vsts.me",
];

const UPLOAD_MARKER: &str = "pypi/upload";

static FEED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^/(?P<org>[^/]+)/(?P<proj>[^/]+)/_packaging/(?P<feed>[^/]+)/pypi/(?P<kind>upload|simple)(?:/|$)",
    )
    .expect("feed path pattern is valid")
});

/// Which side of the feed a URL addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// `.../pypi/upload`: always requires authentication
    Upload,
    /// `.../pypi/simple`: the read index, may be public
    Simple,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Upload => "upload",
            EndpointKind::Simple => "simple",
        }
    }
}

/// A PyPI endpoint of one Azure Artifacts feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoint {
    pub scheme: String,
    /// Host without user-info, plus `:port` when the URL carries one
    pub host: String,
    pub organization: String,
    pub project: String,
    pub feed: String,
    pub kind: EndpointKind,
}

impl FeedEndpoint {
    /// Parse a supported feed URL.
    ///
    /// Returns `None` for unparsable URLs, hosts outside
    /// [`SUPPORTED_HOSTS`], and paths that are not a feed's PyPI endpoint.
    pub fn parse(service_url: &str) -> Option<Self> {
        let url = Url::parse(service_url).ok()?;
        if !host_is_supported(&url) {
            return None;
        }

        let captures = FEED_PATH.captures(url.path())?;
        let kind = match &captures["kind"] {
            "upload" => EndpointKind::Upload,
            _ => EndpointKind::Simple,
        };

        Some(Self {
            scheme: url.scheme().to_string(),
            host: host_with_port(&url)?,
            organization: captures["org"].to_string(),
            project: captures["proj"].to_string(),
            feed: captures["feed"].to_string(),
            kind,
        })
    }

    /// Rebuild the URL from the captured fields only.
    pub fn canonical_url(&self) -> String {
        format!(
            "{}://{}/{}/{}/_packaging/{}/pypi/{}",
            self.scheme,
            self.host,
            self.organization,
            self.project,
            self.feed,
            self.kind.as_str()
        )
    }
}

/// Fold a service URL onto its canonical feed URL.
///
/// Anything that is not a supported feed endpoint comes back unchanged,
/// including URLs that fail to parse.
pub fn normalize(service_url: &str) -> String {
    match FeedEndpoint::parse(service_url) {
        Some(endpoint) => {
            let normalized = endpoint.canonical_url();
            tracing::trace!(service = %redact(service_url), normalized = %normalized, "Normalized service URL");
            normalized
        }
        None => {
            tracing::trace!(service = %redact(service_url), "Service URL left as is");
            service_url.to_string()
        }
    }
}

/// Strip `user:password@` from a URL before it goes into a log line or an
/// error message. URLs without user-info come back unchanged.
pub fn redact(service_url: &str) -> String {
    match Url::parse(service_url) {
        Ok(mut url) => {
            if url.username().is_empty() && url.password().is_none() {
                return service_url.to_string();
            }
            // Only fails for URLs that cannot carry user-info in the first place
            let _ = url.set_password(None);
            let _ = url.set_username("");
            url.to_string()
        }
        Err(_) => strip_user_info(service_url),
    }
}

/// Fallback for strings `Url` rejects: drop everything up to the last `@`
/// of the authority.
fn strip_user_info(service_url: &str) -> String {
    let authority_start = service_url.find("://").map(|i| i + 3).unwrap_or(0);
    let rest = &service_url[authority_start..];
    let authority_len = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    match rest[..authority_len].rfind('@') {
        Some(at) => format!("{}{}", &service_url[..authority_start], &rest[at + 1..]),
        None => service_url.to_string(),
    }
}

/// Whether the URL's host is one of the Azure Artifacts feed hosts.
pub fn is_supported_url(service_url: &str) -> bool {
    Url::parse(service_url)
        .map(|url| host_is_supported(&url))
        .unwrap_or(false)
}

/// Upload endpoints always require authentication, even when the read side
/// of the feed is public.
pub fn is_upload_endpoint(url: &str) -> bool {
    let trimmed = url.strip_suffix('/').unwrap_or(url);
    trimmed.ends_with(UPLOAD_MARKER)
}

fn host_is_supported(url: &Url) -> bool {
    // host_str() already excludes any `user:password@` prefix
    url.host_str()
        .map(|host| SUPPORTED_HOSTS.iter().any(|suffix| host.ends_with(suffix)))
        .unwrap_or(false)
}

fn host_with_port(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
