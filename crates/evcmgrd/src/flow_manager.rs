//! Rule-push boundary.
//!
//! Rules are delivered to switches by an external flow-manager service.
//! The daemon only decides what to install or withdraw; transport
//! failures are surfaced to the deploy engine instead of being
//! swallowed.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::error::{EvcError, EvcResult};
use crate::flow::FlowMod;

/// Boundary for pushing rules to switches.
#[async_trait]
pub trait FlowSender: Send + Sync {
    /// Installs a rule batch on a switch.
    async fn install(&self, switch: &str, flows: &[FlowMod]) -> EvcResult<()>;

    /// Withdraws every rule carrying a cookie from a switch.
    async fn withdraw_by_cookie(&self, switch: &str, cookie: u64) -> EvcResult<()>;
}

#[derive(Debug, Serialize)]
struct FlowsPayload<'a> {
    flows: &'a [FlowMod],
}

/// HTTP client for the flow-manager endpoint.
pub struct HttpFlowManager {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpFlowManager {
    /// Creates a client for the given flow-manager base URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, url: String, switch: &str, body: serde_json::Value) -> EvcResult<()> {
        let reply = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EvcError::flow_push(switch, e.to_string()))?;

        if !reply.status().is_success() {
            return Err(EvcError::flow_push(
                switch,
                format!("{} returned {}", url, reply.status()),
            ));
        }

        debug!("Pushed flow mods to {}", url);
        Ok(())
    }
}

#[async_trait]
impl FlowSender for HttpFlowManager {
    async fn install(&self, switch: &str, flows: &[FlowMod]) -> EvcResult<()> {
        let url = format!("{}/flows/{}", self.endpoint, switch);
        let body = serde_json::to_value(FlowsPayload { flows })
            .map_err(|e| EvcError::flow_push(switch, e.to_string()))?;
        self.post(url, switch, body).await
    }

    async fn withdraw_by_cookie(&self, switch: &str, cookie: u64) -> EvcResult<()> {
        let url = format!("{}/flows/{}/delete", self.endpoint, switch);
        let body = json!({ "flows": [{ "cookie": cookie }] });
        self.post(url, switch, body).await
    }
}

/// Capturing sender used by tests: records every install and
/// withdrawal instead of reaching a switch, and can be armed to fail.
#[derive(Debug, Default)]
pub struct MockFlowSender {
    installed: std::sync::Mutex<Vec<(String, Vec<FlowMod>)>>,
    withdrawn: std::sync::Mutex<Vec<(String, u64)>>,
    fail_install: std::sync::atomic::AtomicBool,
}

impl MockFlowSender {
    /// Creates a capturing sender.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent installs fail.
    pub fn fail_installs(&self, fail: bool) {
        self.fail_install
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Returns the captured install batches.
    pub fn installed(&self) -> Vec<(String, Vec<FlowMod>)> {
        self.installed.lock().expect("mock lock poisoned").clone()
    }

    /// Returns the captured withdrawals.
    pub fn withdrawn(&self) -> Vec<(String, u64)> {
        self.withdrawn.lock().expect("mock lock poisoned").clone()
    }

    /// Forgets everything captured so far.
    pub fn clear(&self) {
        self.installed.lock().expect("mock lock poisoned").clear();
        self.withdrawn.lock().expect("mock lock poisoned").clear();
    }

    /// Returns the number of captured install batches.
    pub fn install_count(&self) -> usize {
        self.installed.lock().expect("mock lock poisoned").len()
    }
}

#[async_trait]
impl FlowSender for MockFlowSender {
    async fn install(&self, switch: &str, flows: &[FlowMod]) -> EvcResult<()> {
        if self.fail_install.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EvcError::flow_push(switch, "mock install failure"));
        }
        self.installed
            .lock()
            .expect("mock lock poisoned")
            .push((switch.to_string(), flows.to_vec()));
        Ok(())
    }

    async fn withdraw_by_cookie(&self, switch: &str, cookie: u64) -> EvcResult<()> {
        self.withdrawn
            .lock()
            .expect("mock lock poisoned")
            .push((switch.to_string(), cookie));
        Ok(())
    }
}
