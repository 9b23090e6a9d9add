use super::{IdentityError, IdentitySource, IdentityToken, SourceFactory, SourceKind};
use crate::provider::Authority;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

type Script = Arc<Mutex<HashMap<SourceKind, VecDeque<Result<IdentityToken, IdentityError>>>>>;

/// Sources that replay scripted results and log every call. Unscripted
/// calls report `Unavailable`.
#[derive(Default)]
pub struct ScriptedFactory {
    script: Script,
    calls: Arc<Mutex<Vec<SourceKind>>>,
    pub environment_configured: bool,
    pub browser_available: bool,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, kind: SourceKind, result: Result<IdentityToken, IdentityError>) -> Self {
        self.script.lock().unwrap().entry(kind).or_default().push_back(result);
        self
    }

    pub fn token(self, kind: SourceKind, value: &str) -> Self {
        self.on(kind, Ok(IdentityToken::new(value, super::AZURE_DEVOPS_SCOPE)))
    }

    pub fn calls(&self) -> Vec<SourceKind> {
        self.calls.lock().unwrap().clone()
    }
}

struct ScriptedSource {
    kind: SourceKind,
    script: Script,
    calls: Arc<Mutex<Vec<SourceKind>>>,
}

impl IdentitySource for ScriptedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn get_token(&self, _scope: &str) -> Result<IdentityToken, IdentityError> {
        self.calls.lock().unwrap().push(self.kind);
        self.script
            .lock()
            .unwrap()
            .get_mut(&self.kind)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(IdentityError::Unavailable("not scripted".to_string())))
    }
}

impl SourceFactory for ScriptedFactory {
    fn environment_configured(&self) -> bool {
        self.environment_configured
    }

    fn browser_available(&self) -> bool {
        self.browser_available
    }

    fn create(&self, kind: SourceKind, _authority: &Authority) -> Box<dyn IdentitySource> {
        Box::new(ScriptedSource {
            kind,
            script: self.script.clone(),
            calls: self.calls.clone(),
        })
    }
}
