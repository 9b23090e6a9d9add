use super::{
    is_browser_available, AzureCliSource, DeviceCodeSource, EnvironmentSource, IdentitySource,
    InteractiveBrowserSource, SharedTokenCacheSource, SourceFactory, SourceKind, PUBLIC_CLIENT_ID,
};
use crate::config::Settings;
use crate::http::HttpClient;
use crate::provider::Authority;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Production sources talking to Azure AD and the local tools.
pub struct AzureSourceFactory {
    http: Arc<dyn HttpClient>,
    interactive_timeout: Duration,
    shared_cache_path: PathBuf,
}

impl AzureSourceFactory {
    pub fn new(http: Arc<dyn HttpClient>, settings: &Settings) -> Self {
        Self {
            http,
            interactive_timeout: settings.device_code_timeout(),
            shared_cache_path: super::default_cache_path(),
        }
    }

    pub fn with_shared_cache_path(mut self, path: PathBuf) -> Self {
        self.shared_cache_path = path;
        self
    }
}

impl SourceFactory for AzureSourceFactory {
    fn environment_configured(&self) -> bool {
        EnvironmentSource::is_configured()
    }

    fn browser_available(&self) -> bool {
        is_browser_available()
    }

    fn create(&self, kind: SourceKind, authority: &Authority) -> Box<dyn IdentitySource> {
        let http = self.http.clone();
        let authority = authority.clone();
        match kind {
            SourceKind::Environment => Box::new(EnvironmentSource::from_env(http, authority)),
            SourceKind::AzureCli => Box::new(AzureCliSource::new(authority.tenant_id)),
            SourceKind::SharedTokenCache => Box::new(SharedTokenCacheSource::new(
                http,
                authority,
                self.shared_cache_path.clone(),
            )),
            SourceKind::InteractiveBrowser => Box::new(InteractiveBrowserSource::new(
                http,
                authority,
                PUBLIC_CLIENT_ID,
                self.interactive_timeout,
            )),
            SourceKind::DeviceCode => Box::new(DeviceCodeSource::new(
                http,
                authority,
                PUBLIC_CLIENT_ID,
                self.interactive_timeout,
            )),
        }
    }
}
