use super::{BasicAuth, HttpClient, HttpResponse};
use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub basic_username: Option<String>,
    pub bearer_token: Option<String>,
    pub form: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
}

impl RecordedRequest {
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Hands out queued responses in order and records every request.
/// `None` in the queue simulates a transport failure.
#[derive(Default)]
pub struct ScriptedHttp {
    responses: Mutex<VecDeque<Option<HttpResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: HttpResponse) -> Self {
        self.responses.lock().unwrap().push_back(Some(response));
        self
    }

    pub fn fail(self) -> Self {
        self.responses.lock().unwrap().push_back(None);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: RecordedRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);
        match self.responses.lock().unwrap().pop_front() {
            Some(Some(response)) => Ok(response),
            Some(None) => Err(anyhow!("connection refused: {}", url)),
            None => Err(anyhow!("no scripted response for {}", url)),
        }
    }
}

impl HttpClient for ScriptedHttp {
    fn get(&self, url: &str, auth: Option<BasicAuth<'_>>) -> Result<HttpResponse> {
        self.next(RecordedRequest {
            method: "GET",
            url: url.to_string(),
            basic_username: auth.map(|a| a.username.to_string()),
            bearer_token: None,
            form: Vec::new(),
            json: None,
        })
    }

    fn post_json(&self, url: &str, bearer_token: &str, body: &serde_json::Value) -> Result<HttpResponse> {
        self.next(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            basic_username: None,
            bearer_token: Some(bearer_token.to_string()),
            form: Vec::new(),
            json: Some(body.clone()),
        })
    }

    fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<HttpResponse> {
        self.next(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            basic_username: None,
            bearer_token: None,
            form: form.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            json: None,
        })
    }
}
