use crate::error::{CollectError, Result};
use crate::exposition::parse_snapshot;
use crate::source::MetricsSource;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use stratus_core::{CollectorConfig, Snapshot, SnapshotStore};
use stratus_metrics::EngineMetrics;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome counts of one collection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Polls every known node and keeps the shared snapshot store current
pub struct MetricsCollector {
    store: Arc<SnapshotStore>,
    source: Arc<dyn MetricsSource>,
    metrics: Arc<EngineMetrics>,
    config: CollectorConfig,
}

impl MetricsCollector {
    pub fn new(
        store: Arc<SnapshotStore>,
        source: Arc<dyn MetricsSource>,
        metrics: Arc<EngineMetrics>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            store,
            source,
            metrics,
            config,
        }
    }

    /// Run the collection loop until cancelled
    ///
    /// Cancellation stops new passes. A pass already running finishes and
    /// records its snapshots; each request in it is bounded by the request
    /// timeout.
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "Starting metrics collector (interval: {:?}, timeout: {:?}, staleness: {:?})",
            self.config.tick(),
            self.config.request_timeout(),
            self.config.staleness()
        );

        let mut interval = tokio::time::interval(self.config.tick());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Metrics collector shutting down");
                    return;
                }
                _ = interval.tick() => {
                    let summary = self.collect_all().await;
                    if summary.failed > 0 {
                        warn!(
                            "Collection pass finished: {} succeeded, {} failed",
                            summary.succeeded, summary.failed
                        );
                    } else {
                        debug!("Collection pass finished: {} nodes", summary.succeeded);
                    }
                }
            }
        }
    }

    /// Collect every known node once, concurrently, bounded by `max_in_flight`
    pub async fn collect_all(&self) -> CollectionSummary {
        let node_ids: Vec<String> = self.store.nodes().iter().map(|n| n.id.clone()).collect();
        if node_ids.is_empty() {
            return CollectionSummary::default();
        }

        let limit = self.config.effective_in_flight(node_ids.len());
        let results: Vec<bool> = stream::iter(node_ids)
            .map(|node_id| async move { self.collect_and_record(&node_id).await.is_ok() })
            .buffer_unordered(limit)
            .collect()
            .await;

        let succeeded = results.iter().filter(|ok| **ok).count();
        CollectionSummary {
            succeeded,
            failed: results.len() - succeeded,
        }
    }

    /// Query one node's endpoint and parse the result, without side effects
    pub async fn collect(&self, node_id: &str) -> Result<Snapshot> {
        let node = self
            .store
            .node(node_id)
            .ok_or_else(|| CollectError::node_not_found(node_id))?;

        let body = match tokio::time::timeout(
            self.config.request_timeout(),
            self.source.fetch(&node),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(CollectError::unreachable(
                    node_id,
                    format!("no response within {:?}", self.config.request_timeout()),
                ))
            }
        };

        parse_snapshot(node_id, &body, Utc::now())
    }

    /// Collect one node and apply the outcome to the store and metrics
    pub async fn collect_and_record(&self, node_id: &str) -> Result<()> {
        match self.collect(node_id).await {
            Ok(snapshot) => {
                if let Err(e) = self.store.record_snapshot(node_id, snapshot) {
                    // Node removed while the request was in flight
                    debug!("Dropping snapshot for {}: {}", node_id, e);
                    return Err(CollectError::node_not_found(node_id));
                }
                self.metrics.collection_succeeded(node_id);
                debug!("Collected snapshot for node {}", node_id);
                Ok(())
            }
            Err(err) => {
                let Some(kind) = err.kind() else {
                    debug!("Skipping node {}: {}", node_id, err);
                    return Err(err);
                };

                warn!("Collection failed for node {}: {}", node_id, err);
                match self.store.record_failure(node_id, kind, err.to_string()) {
                    Ok(health) => self.metrics.collection_failed(
                        node_id,
                        kind.as_str(),
                        health.consecutive_failures,
                        health.degraded,
                    ),
                    Err(e) => error!("Failed to record collection failure for {}: {}", node_id, e),
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticMetricsSource;
    use async_trait::async_trait;
    use std::time::Duration;
    use stratus_core::{Capacity, Node};

    const HEALTHY: &str = "node_cpu_used_millicores 1000\nnode_memory_used_bytes 1073741824\n";

    fn node(id: &str) -> Node {
        Node::new(
            id,
            Capacity {
                cpu_millicores: 4000,
                memory_bytes: 8 << 30,
                gpu_count: 0,
                gpu_memory_bytes: 0,
            },
            format!("http://{}:9100/metrics", id),
        )
    }

    fn setup(source: Arc<dyn MetricsSource>) -> (MetricsCollector, Arc<SnapshotStore>, Arc<EngineMetrics>) {
        let config = CollectorConfig::default();
        let store = Arc::new(SnapshotStore::new(
            config.staleness(),
            config.degraded_after_failures,
        ));
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let collector = MetricsCollector::new(store.clone(), source, metrics.clone(), config);
        (collector, store, metrics)
    }

    #[tokio::test]
    async fn test_collect_and_record_success() {
        let source = Arc::new(StaticMetricsSource::new());
        source.set_body("n1", HEALTHY);
        let (collector, store, _) = setup(source);
        store.upsert_node(node("n1"));

        collector.collect_and_record("n1").await.unwrap();

        let snap = store.snapshot("n1").unwrap();
        assert_eq!(snap.cpu_used_millicores, 1000);
        assert_eq!(store.health("n1").unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_collect_unknown_node() {
        let (collector, _, _) = setup(Arc::new(StaticMetricsSource::new()));
        let err = collector.collect("ghost").await.unwrap_err();
        assert!(matches!(err, CollectError::NodeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_three_unreachable_marks_degraded_until_success() {
        let source = Arc::new(StaticMetricsSource::new());
        let (collector, store, metrics) = setup(source.clone());
        store.upsert_node(node("n3"));
        source.set_unreachable("n3", "connection refused");

        for _ in 0..3 {
            assert!(collector.collect_and_record("n3").await.is_err());
        }

        let health = store.health("n3").unwrap();
        assert_eq!(health.consecutive_failures, 3);
        assert!(health.degraded);
        assert!(health.unreachable);
        let view = store.view(Utc::now());
        assert!(view.usable_snapshot(view.get("n3").unwrap()).is_none());
        assert!(metrics
            .render()
            .unwrap()
            .contains("stratus_node_degraded{node=\"n3\"} 1"));

        source.set_body("n3", HEALTHY);
        collector.collect_and_record("n3").await.unwrap();

        let health = store.health("n3").unwrap();
        assert!(!health.degraded);
        let view = store.view(Utc::now());
        assert!(view.usable_snapshot(view.get("n3").unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_previous_snapshot() {
        let source = Arc::new(StaticMetricsSource::new());
        source.set_body("n1", HEALTHY);
        let (collector, store, _) = setup(source.clone());
        store.upsert_node(node("n1"));
        collector.collect_and_record("n1").await.unwrap();

        source.set_body("n1", "garbage without value");
        let err = collector.collect_and_record("n1").await.unwrap_err();
        assert!(matches!(err, CollectError::ParseFailure { .. }));

        let health = store.health("n1").unwrap();
        assert_eq!(health.consecutive_failures, 1);
        assert!(!health.unreachable);
        let view = store.view(Utc::now());
        assert!(view.usable_snapshot(view.get("n1").unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_collect_all_counts_outcomes() {
        let source = Arc::new(StaticMetricsSource::new());
        source.set_body("a", HEALTHY);
        source.set_body("b", HEALTHY);
        source.set_unreachable("c", "down");
        let (collector, store, _) = setup(source);
        for id in ["a", "b", "c"] {
            store.upsert_node(node(id));
        }

        let summary = collector.collect_all().await;
        assert_eq!(summary, CollectionSummary { succeeded: 2, failed: 1 });
    }

    struct HangingSource;

    #[async_trait]
    impl MetricsSource for HangingSource {
        async fn fetch(&self, _node: &Node) -> Result<String> {
            std::future::pending::<Result<String>>().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_is_unreachable() {
        let (collector, store, _) = setup(Arc::new(HangingSource));
        store.upsert_node(node("slow"));

        let err = collector.collect_and_record("slow").await.unwrap_err();
        assert!(matches!(err, CollectError::Unreachable { .. }));
        assert!(store.health("slow").unwrap().unreachable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let source = Arc::new(StaticMetricsSource::new());
        source.set_body("n1", HEALTHY);
        let (collector, store, _) = setup(source);
        store.upsert_node(node("n1"));

        let collector = Arc::new(collector);
        let token = CancellationToken::new();
        let handle = {
            let collector = collector.clone();
            let token = token.clone();
            tokio::spawn(async move { collector.run(token).await })
        };

        // First tick fires immediately
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.snapshot("n1").is_some());

        token.cancel();
        handle.await.unwrap();
    }

    struct SlowSource;

    #[async_trait]
    impl MetricsSource for SlowSource {
        async fn fetch(&self, _node: &Node) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(HEALTHY.to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_lets_running_pass_finish() {
        let (collector, store, _) = setup(Arc::new(SlowSource));
        store.upsert_node(node("n1"));

        let collector = Arc::new(collector);
        let token = CancellationToken::new();
        let handle = {
            let collector = collector.clone();
            let token = token.clone();
            tokio::spawn(async move { collector.run(token).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.snapshot("n1").is_none());
        token.cancel();
        handle.await.unwrap();

        let snap = store.snapshot("n1").unwrap();
        assert_eq!(snap.cpu_used_millicores, 1000);
    }
}
