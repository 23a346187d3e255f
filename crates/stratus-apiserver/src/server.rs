use crate::handlers::*;
use crate::AppState;
use axum::routing::{get, put};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// API server configuration
#[derive(Clone)]
pub struct Config {
    /// Address to listen on
    pub listen_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

/// API server
pub struct ApiServer {
    config: Config,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: Config, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Build the router
    fn build_router(&self) -> Router {
        Router::new()
            // Health checks
            .route("/healthz", get(healthz))
            .route("/livez", get(livez))
            .route("/readyz", get(readyz))
            // Metrics export
            .route("/metrics", get(export_metrics))
            // Workloads
            .route(
                "/api/v1/workloads",
                get(list_workloads).post(submit_workload),
            )
            .route(
                "/api/v1/workloads/{id}",
                get(get_workload).delete(evict_workload),
            )
            .route(
                "/api/v1/workloads/{id}/status",
                put(update_workload_status),
            )
            // Nodes
            .route("/api/v1/nodes", get(list_nodes).post(register_node))
            .route(
                "/api/v1/nodes/{id}",
                get(get_node).delete(remove_node),
            )
            // Audit
            .route("/api/v1/audit", get(list_audit))
            .route("/api/v1/decisions", get(list_decisions))
            // Add tracing and state
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until the token is cancelled
    pub async fn run(self, token: CancellationToken) -> Result<(), std::io::Error> {
        let app = self.build_router();

        info!("Starting API server on {}", self.config.listen_addr);

        let listener = TcpListener::bind(self.config.listen_addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

/// Health check endpoint
async fn healthz() -> &'static str {
    "ok"
}

/// Liveness probe
async fn livez() -> &'static str {
    "ok"
}

/// Readiness probe
async fn readyz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use stratus_core::{BinderConfig, SnapshotStore};
    use stratus_executor::{AuditLog, BindingExecutor, MockOrchestrationApi, WorkloadRegistry};
    use stratus_metrics::EngineMetrics;
    use tower::ServiceExt;

    fn setup() -> (Router, Arc<AppState>) {
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let executor = Arc::new(BindingExecutor::new(
            Arc::new(MockOrchestrationApi::new()),
            Arc::new(WorkloadRegistry::new()),
            Arc::new(AuditLog::new()),
            metrics.clone(),
            BinderConfig::default(),
        ));
        let store = Arc::new(SnapshotStore::new(Duration::from_secs(60), 3));
        let state = Arc::new(AppState::new(executor, store, metrics));
        let router = ApiServer::new(Config::default(), state.clone()).build_router();
        (router, state)
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn workload_body(id: &str) -> Value {
        json!({ "id": id, "cpu": "500m", "memory": "1Gi", "movable": true })
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_health_probes() {
        let (router, _) = setup();
        for uri in ["/healthz", "/livez", "/readyz"] {
            let response = router
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_submit_and_query_workload() {
        let (router, _) = setup();

        let (status, body) = send(&router, "POST", "/api/v1/workloads", Some(workload_body("w1"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["state"], "pending");
        assert_eq!(body["workload"]["requirements"]["cpu_millicores"], 500);

        let (status, body) = send(&router, "GET", "/api/v1/workloads/w1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["workload"]["id"], "w1");

        let (status, body) = send(&router, "GET", "/api/v1/workloads?state=pending", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);

        let (_, body) = send(&router, "GET", "/api/v1/workloads?state=bound", None).await;
        assert_eq!(body["count"], 0);

        let (status, body) = send(&router, "POST", "/api/v1/workloads", Some(workload_body("w1"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], 409);

        let (status, _) = send(&router, "GET", "/api/v1/workloads/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_workloads_rejected() {
        let (router, _) = setup();

        let bad_quantity = json!({ "id": "w", "cpu": "lots", "memory": "1Gi" });
        let (status, _) = send(&router, "POST", "/api/v1/workloads", Some(bad_quantity)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let no_gpus = json!({ "id": "w", "cpu": "1", "memory": "1Gi", "gpu_mode": "mandatory" });
        let (status, _) = send(&router, "POST", "/api/v1/workloads", Some(no_gpus)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_node_membership() {
        let (router, state) = setup();
        let spec = json!({
            "id": "gpu-1",
            "affinity_class": "training",
            "cpu": "16",
            "memory": "64Gi",
            "gpus": 2,
            "gpu_memory": "24Gi",
            "metrics_url": "http://gpu-1:9100/metrics"
        });

        let (status, body) = send(&router, "POST", "/api/v1/nodes", Some(spec)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["node"]["capacity"]["cpu_millicores"], 16000);
        assert_eq!(body["schedulable"], false);
        assert!(state.store.node("gpu-1").is_some());

        let (_, body) = send(&router, "GET", "/api/v1/nodes", None).await;
        assert_eq!(body["count"], 1);

        let (status, _) = send(&router, "DELETE", "/api/v1/nodes/gpu-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.store.is_empty());

        let (status, _) = send(&router, "DELETE", "/api/v1/nodes/gpu-1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_lifecycle_reports_and_eviction() {
        let (router, state) = setup();
        send(&router, "POST", "/api/v1/workloads", Some(workload_body("run"))).await;
        send(&router, "POST", "/api/v1/workloads", Some(workload_body("evict"))).await;
        state.executor.bind("run", "n1", 80.0).await.unwrap();
        state.executor.bind("evict", "n1", 70.0).await.unwrap();

        let (status, body) = send(
            &router,
            "PUT",
            "/api/v1/workloads/run/status",
            Some(json!({ "state": "running" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "running");

        let (_, body) = send(
            &router,
            "PUT",
            "/api/v1/workloads/run/status",
            Some(json!({ "state": "completed" })),
        )
        .await;
        assert_eq!(body["state"], "completed");

        // Completed workloads cannot be evicted
        let (status, _) = send(&router, "DELETE", "/api/v1/workloads/run", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&router, "DELETE", "/api/v1/workloads/evict", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "evicted");

        let (_, body) = send(&router, "GET", "/api/v1/audit?workload=evict", None).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["items"][0]["action"], "bind");
        assert_eq!(body["items"][1]["action"], "unbind");
        assert_eq!(body["items"][1]["cause"], "eviction");

        let (_, body) = send(&router, "GET", "/api/v1/audit?limit=1", None).await;
        assert_eq!(body["count"], 1);

        let (_, body) = send(&router, "GET", "/api/v1/decisions", None).await;
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_metrics_export() {
        let (router, _) = setup();
        send(&router, "POST", "/api/v1/workloads", Some(workload_body("w1"))).await;

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("stratus_pending_workloads 1"));
    }
}
