//! Authenticated GET that tells whether a credential is accepted.

use crate::credentials::FeedCredential;
use crate::feed::redact;
use crate::http::{BasicAuth, HttpClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Any status below 500 other than 401/403
    Authorized,
    /// 401 or 403
    Rejected(u16),
    /// Server error or transport failure
    Unavailable,
}

impl ProbeOutcome {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ProbeOutcome::Rejected(status),
            s if s >= 500 => ProbeOutcome::Unavailable,
            _ => ProbeOutcome::Authorized,
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, ProbeOutcome::Authorized)
    }
}

/// GET `url`, with `credential` as HTTP Basic when given.
pub fn probe(http: &dyn HttpClient, url: &str, credential: Option<&FeedCredential>) -> ProbeOutcome {
    let auth = credential.map(|c| BasicAuth {
        username: &c.username,
        password: c.secret.expose(),
    });

    let outcome = match http.get(url, auth) {
        Ok(response) => ProbeOutcome::from_status(response.status),
        Err(e) => {
            tracing::debug!(url = %redact(url), error = %format!("{:#}", e), "Probe request failed");
            ProbeOutcome::Unavailable
        }
    };
    tracing::debug!(url = %redact(url), authenticated = credential.is_some(), outcome = ?outcome, "Probed feed");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialSource;
    use crate::http::testing::ScriptedHttp;
    use crate::http::HttpResponse;

    #[test]
    fn test_status_classification() {
        assert_eq!(ProbeOutcome::from_status(200), ProbeOutcome::Authorized);
        assert_eq!(ProbeOutcome::from_status(404), ProbeOutcome::Authorized);
        assert_eq!(ProbeOutcome::from_status(401), ProbeOutcome::Rejected(401));
        assert_eq!(ProbeOutcome::from_status(403), ProbeOutcome::Rejected(403));
        assert_eq!(ProbeOutcome::from_status(500), ProbeOutcome::Unavailable);
        assert_eq!(ProbeOutcome::from_status(503), ProbeOutcome::Unavailable);
    }

    #[test]
    fn test_sends_credential_as_basic() {
        let http = ScriptedHttp::new().respond(HttpResponse::new(200));
        let credential = FeedCredential::new("VssSessionToken", "pat", CredentialSource::LocalStore);

        let outcome = probe(&http, "https://pkgs.dev.azure.com/o/p/_packaging/f/pypi/simple", Some(&credential));

        assert!(outcome.is_authorized());
        assert_eq!(http.requests()[0].basic_username.as_deref(), Some("VssSessionToken"));
    }

    #[test]
    fn test_unreachable_is_unavailable() {
        let http = ScriptedHttp::new().fail();
        assert_eq!(probe(&http, "https://example.invalid", None), ProbeOutcome::Unavailable);
    }
}
