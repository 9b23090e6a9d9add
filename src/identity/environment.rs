//! Service principal from `AZURE_CLIENT_ID` / `AZURE_CLIENT_SECRET`.

use super::aad::{self, TokenReply};
use super::{IdentityError, IdentitySource, IdentityToken, SourceKind};
use crate::credentials::Secret;
use crate::http::HttpClient;
use crate::provider::Authority;
use std::sync::Arc;

pub const CLIENT_ID_ENV_VAR: &str = "AZURE_CLIENT_ID";
pub const CLIENT_SECRET_ENV_VAR: &str = "AZURE_CLIENT_SECRET";
pub const TENANT_ID_ENV_VAR: &str = "AZURE_TENANT_ID";

/// Client-credentials grant for a service principal.
pub struct EnvironmentSource {
    http: Arc<dyn HttpClient>,
    authority: Authority,
    client_id: Option<String>,
    client_secret: Option<Secret>,
    tenant_id: Option<String>,
}

impl EnvironmentSource {
    pub fn new(
        http: Arc<dyn HttpClient>,
        authority: Authority,
        client_id: Option<String>,
        client_secret: Option<Secret>,
        tenant_id: Option<String>,
    ) -> Self {
        Self {
            http,
            authority,
            client_id,
            client_secret,
            tenant_id,
        }
    }

    pub fn from_env(http: Arc<dyn HttpClient>, authority: Authority) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self::new(
            http,
            authority,
            var(CLIENT_ID_ENV_VAR),
            var(CLIENT_SECRET_ENV_VAR).map(Secret::new),
            var(TENANT_ID_ENV_VAR),
        )
    }

    pub fn is_configured() -> bool {
        std::env::var(CLIENT_ID_ENV_VAR).is_ok_and(|v| !v.is_empty())
    }
}

impl IdentitySource for EnvironmentSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Environment
    }

    fn get_token(&self, scope: &str) -> Result<IdentityToken, IdentityError> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or_else(|| IdentityError::Unavailable(format!("{} is not set", CLIENT_ID_ENV_VAR)))?;
        // Certificate and workload identity variants are not handled here
        let secret = self.client_secret.as_ref().ok_or_else(|| {
            IdentityError::Unavailable(format!("{} is not set", CLIENT_SECRET_ENV_VAR))
        })?;

        let url = aad::endpoint(&self.authority, self.tenant_id.as_deref(), "token");
        tracing::debug!(url = %url, client_id = %client_id, "Requesting service principal token");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", secret.expose()),
            ("scope", scope),
        ];
        match aad::request_token(self.http.as_ref(), &url, &form, scope)? {
            TokenReply::Issued(token) => Ok(token),
            TokenReply::Rejected(error) => Err(IdentityError::Authentication(error.summary())),
        }
    }
}
