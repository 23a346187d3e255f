use crate::error::{CollectError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use stratus_core::Node;
use tracing::debug;

/// Where node exposition bodies come from
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Fetch the raw exposition body for a node
    ///
    /// Transport problems map to [`CollectError::Unreachable`]. The collector
    /// enforces the request timeout around this call.
    async fn fetch(&self, node: &Node) -> Result<String>;
}

/// Fetches `node.metrics_url` over HTTP
pub struct HttpMetricsSource {
    client: Client,
}

impl HttpMetricsSource {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch(&self, node: &Node) -> Result<String> {
        debug!("GET {}", node.metrics_url);

        let resp = self
            .client
            .get(&node.metrics_url)
            .send()
            .await
            .map_err(|e| CollectError::unreachable(&node.id, format!("HTTP request failed: {}", e)))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(CollectError::unreachable(
                &node.id,
                format!("exporter returned status {}", status),
            ));
        }
        if !status.is_success() {
            return Err(CollectError::parse_failure(
                &node.id,
                format!("exporter returned status {}", status),
            ));
        }

        resp.text()
            .await
            .map_err(|e| CollectError::unreachable(&node.id, format!("Failed to read body: {}", e)))
    }
}

/// Scripted responses keyed by node id, for tests and local development
#[derive(Default)]
pub struct StaticMetricsSource {
    bodies: Mutex<HashMap<String, std::result::Result<String, String>>>,
}

impl StaticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `node_id` on every fetch until changed
    pub fn set_body(&self, node_id: &str, body: impl Into<String>) {
        self.bodies.lock().insert(node_id.to_string(), Ok(body.into()));
    }

    /// Make `node_id` unreachable until changed
    pub fn set_unreachable(&self, node_id: &str, message: impl Into<String>) {
        self.bodies
            .lock()
            .insert(node_id.to_string(), Err(message.into()));
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn fetch(&self, node: &Node) -> Result<String> {
        match self.bodies.lock().get(&node.id) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(message)) => Err(CollectError::unreachable(&node.id, message.clone())),
            None => Err(CollectError::unreachable(&node.id, "no scripted response")),
        }
    }
}
