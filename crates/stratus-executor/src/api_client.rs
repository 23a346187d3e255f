use crate::api::{BindError, OrchestrationApi};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

#[derive(Serialize)]
struct BindingRequest<'a> {
    workload_id: &'a str,
    node_id: &'a str,
}

/// HTTP client for an external orchestration API
///
/// - `POST {base}/bindings` with `{"workload_id", "node_id"}` binds
/// - `DELETE {base}/bindings/{workload_id}?node={node_id}` unbinds
pub struct HttpOrchestrationApi {
    base_url: String,
    client: Client,
}

impl HttpOrchestrationApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn classify(
        resp: reqwest::Response,
        workload_id: &str,
        node_id: &str,
    ) -> Result<(), BindError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::CONFLICT => Err(BindError::conflict(workload_id, node_id, body)),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                Err(BindError::timeout(workload_id, node_id))
            }
            _ => Err(BindError::rejected(
                workload_id,
                node_id,
                format!("status {}: {}", status, body),
            )),
        }
    }

    fn transport_error(err: reqwest::Error, workload_id: &str, node_id: &str) -> BindError {
        // Connection and timeout problems are transient; anything else is a refusal
        if err.is_timeout() || err.is_connect() {
            BindError::timeout(workload_id, node_id)
        } else {
            BindError::rejected(workload_id, node_id, format!("HTTP request failed: {}", err))
        }
    }
}

#[async_trait]
impl OrchestrationApi for HttpOrchestrationApi {
    async fn bind(&self, workload_id: &str, node_id: &str) -> Result<(), BindError> {
        let url = format!("{}/bindings", self.base_url);
        debug!("POST {} ({} -> {})", url, workload_id, node_id);

        let resp = self
            .client
            .post(&url)
            .json(&BindingRequest {
                workload_id,
                node_id,
            })
            .send()
            .await
            .map_err(|e| Self::transport_error(e, workload_id, node_id))?;

        Self::classify(resp, workload_id, node_id).await
    }

    async fn unbind(&self, workload_id: &str, node_id: &str) -> Result<(), BindError> {
        let url = format!("{}/bindings/{}", self.base_url, workload_id);
        debug!("DELETE {} (node {})", url, node_id);

        let resp = self
            .client
            .delete(&url)
            .query(&[("node", node_id)])
            .send()
            .await
            .map_err(|e| Self::transport_error(e, workload_id, node_id))?;

        Self::classify(resp, workload_id, node_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let api = HttpOrchestrationApi::new("http://orchestrator:8080/");
        assert_eq!(api.base_url(), "http://orchestrator:8080");
    }
}
