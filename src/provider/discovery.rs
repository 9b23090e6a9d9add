//! Authority discovery from a feed's unauthenticated response.

use crate::feed::redact;
use crate::http::HttpClient;
use regex::Regex;
use std::sync::LazyLock;

static AUTHORIZATION_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Bearer authorization_uri=(https://[^/]+/)([^,\s]+)")
        .expect("authorization_uri pattern is valid")
});

const EXCHANGE_ENDPOINT_HEADER: &str = "x-vss-authorizationendpoint";

/// Where to sign in and where to exchange the resulting token.
///
/// Every field may be empty when the feed did not say; consumers fall back
/// to the multi-tenant endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authority {
    /// Identity provider base, with trailing `/`
    pub authority: String,
    pub tenant_id: String,
    /// Base URL of the token exchange service
    pub exchange_endpoint: String,
}

impl Authority {
    /// Build from response headers.
    pub fn from_headers(www_authenticate: Option<&str>, exchange_endpoint: Option<&str>) -> Self {
        let (authority, tenant_id) = www_authenticate
            .and_then(|header| AUTHORIZATION_URI.captures(header))
            .map(|captures| {
                let tenant = captures[2]
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                (captures[1].to_string(), tenant)
            })
            .unwrap_or_default();

        Self {
            authority,
            tenant_id,
            exchange_endpoint: exchange_endpoint.map(|v| v.trim().to_string()).unwrap_or_default(),
        }
    }
}

/// One unauthenticated GET against `url`. Never fails: transport errors and
/// missing headers yield empty fields.
pub fn discover(http: &dyn HttpClient, url: &str) -> Authority {
    let response = match http.get(url, None) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(url = %redact(url), error = %format!("{:#}", e), "Authority discovery request failed");
            return Authority::default();
        }
    };

    let authority = Authority::from_headers(
        response.header("www-authenticate"),
        response.header(EXCHANGE_ENDPOINT_HEADER),
    );
    tracing::debug!(
        url = %redact(url),
        status = response.status,
        authority = %authority.authority,
        tenant = %authority.tenant_id,
        exchange_endpoint = %authority.exchange_endpoint,
        "Discovered authority"
    );
    authority
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::ScriptedHttp;
    use crate::http::HttpResponse;

    const FEED: &str = "https://pkgs.dev.azure.com/org/proj/_packaging/feed/pypi/simple";

    #[test]
    fn test_discovers_tenant_and_exchange_endpoint() {
        let http = ScriptedHttp::new().respond(
            HttpResponse::new(401)
                .with_header(
                    "WWW-Authenticate",
                    "Bearer authorization_uri=https://login.windows.net/72f988bf-86f1-41af-91ab-2d7cd011db47, Basic realm=\"https://pkgsprodcus1.pkgs.visualstudio.com/\", TFS-Federated",
                )
                .with_header("X-VSS-AuthorizationEndpoint", "https://vssps.dev.azure.com/org/"),
        );

        let authority = discover(&http, FEED);
        assert_eq!(authority.authority, "https://login.windows.net/");
        assert_eq!(authority.tenant_id, "72f988bf-86f1-41af-91ab-2d7cd011db47");
        assert_eq!(authority.exchange_endpoint, "https://vssps.dev.azure.com/org/");
        assert_eq!(http.requests()[0].basic_username, None);
    }

    #[test]
    fn test_tenant_is_last_path_segment() {
        let authority = Authority::from_headers(
            Some("Bearer authorization_uri=https://login.microsoftonline.com/common/tenant-id"),
            None,
        );
        assert_eq!(authority.authority, "https://login.microsoftonline.com/");
        assert_eq!(authority.tenant_id, "tenant-id");
        assert_eq!(authority.exchange_endpoint, "");
    }

    #[test]
    fn test_missing_headers_yield_empty_fields() {
        let http = ScriptedHttp::new().respond(HttpResponse::new(200));
        assert_eq!(discover(&http, FEED), Authority::default());

        let authority = Authority::from_headers(Some("Basic realm=\"x\""), Some("https://vssps/"));
        assert_eq!(authority.tenant_id, "");
        assert_eq!(authority.exchange_endpoint, "https://vssps/");
    }

    #[test]
    fn test_network_failure_yields_empty_authority() {
        let http = ScriptedHttp::new().fail();
        assert_eq!(discover(&http, FEED), Authority::default());
    }
}
