//! In-memory transports shared by the unit tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::config::ApiConfig;
use crate::error::FetchError;
use crate::ledger_client::{JsonTransport, Params};

pub type Call = (String, Vec<(String, String)>);

pub fn test_api_config() -> ApiConfig {
    ApiConfig {
        base_url: "http://ledger.test".to_string(),
        api_key: "test-key".to_string(),
        backoff_base_ms: 0,
        probe_on_start: false,
        ..ApiConfig::default()
    }
}

/// Replays queued responses in order, whatever the URL.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Value, FetchError>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<Value, FetchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl JsonTransport for ScriptedTransport {
    async fn get_json(&self, url: &str, params: &Params) -> Result<Value, FetchError> {
        self.calls.lock().unwrap().push((
            url.to_string(),
            params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        ));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(FetchError::Status(599)))
    }
}

/// Answers by URL: the first route whose fragment occurs in the URL wins.
/// Unrouted URLs fail with a 404.
pub struct RoutedTransport {
    routes: Vec<(String, Value)>,
    calls: Mutex<Vec<String>>,
}

impl RoutedTransport {
    pub fn new(routes: Vec<(&str, Value)>) -> Self {
        Self {
            routes: routes.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl JsonTransport for RoutedTransport {
    async fn get_json(&self, url: &str, _params: &Params) -> Result<Value, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.routes
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, body)| Ok(body.clone()))
            .unwrap_or(Err(FetchError::Status(404)))
    }
}
