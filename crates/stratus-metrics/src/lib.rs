//! Stratus Metrics - Operator-facing metrics export
//!
//! All engine counters and gauges live in one [`EngineMetrics`] registry that
//! the API server renders in the Prometheus text format on `/metrics`.

// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use thiserror::Error;

/// Metrics error type
#[derive(Error, Debug, Diagnostic)]
pub enum MetricsError {
    /// Metric could not be created or registered
    #[error("Metric registration failed: {0}")]
    #[diagnostic(
        code(metrics::registration_failed),
        help("Metric names must be unique within the registry")
    )]
    Registration(#[from] prometheus::Error),

    /// Registry could not be rendered
    #[error("Metric export failed: {message}")]
    #[diagnostic(code(metrics::export_failed), help("This is likely a bug. Please report it"))]
    Export {
        #[allow(unused)]
        message: String,
    },
}

/// Result type for metrics operations
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Buckets for placement scores in [0, 100]
const SCORE_BUCKETS: [f64; 10] = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0];

/// Counters and gauges for every engine component
pub struct EngineMetrics {
    registry: Registry,
    collections: IntCounterVec,
    collection_failures: IntCounterVec,
    node_consecutive_failures: IntGaugeVec,
    node_degraded: IntGaugeVec,
    scoring_decisions: IntCounterVec,
    placement_score: Histogram,
    bind_attempts: IntCounterVec,
    unbinds: IntCounterVec,
    rebalance_moves: IntCounterVec,
    rebalance_ticks_skipped: IntCounter,
    pending_workloads: IntGauge,
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let collections = IntCounterVec::new(
            Opts::new("stratus_collections_total", "Metric collections per outcome"),
            &["outcome"],
        )?;
        let collection_failures = IntCounterVec::new(
            Opts::new(
                "stratus_collection_failures_total",
                "Failed metric collections per node and failure kind",
            ),
            &["node", "kind"],
        )?;
        let node_consecutive_failures = IntGaugeVec::new(
            Opts::new(
                "stratus_node_consecutive_failures",
                "Consecutive failed collections per node",
            ),
            &["node"],
        )?;
        let node_degraded = IntGaugeVec::new(
            Opts::new(
                "stratus_node_degraded",
                "Whether the node is excluded from placement (1) or not (0)",
            ),
            &["node"],
        )?;
        let scoring_decisions = IntCounterVec::new(
            Opts::new(
                "stratus_scoring_decisions_total",
                "Scoring attempts per outcome",
            ),
            &["outcome"],
        )?;
        let placement_score = Histogram::with_opts(
            HistogramOpts::new(
                "stratus_placement_score",
                "Total score of the chosen node for committed placements",
            )
            .buckets(SCORE_BUCKETS.to_vec()),
        )?;
        let bind_attempts = IntCounterVec::new(
            Opts::new(
                "stratus_bind_attempts_total",
                "Bind requests sent to the orchestration API per outcome",
            ),
            &["outcome"],
        )?;
        let unbinds = IntCounterVec::new(
            Opts::new(
                "stratus_unbinds_total",
                "Unbind requests sent to the orchestration API per outcome",
            ),
            &["outcome"],
        )?;
        let rebalance_moves = IntCounterVec::new(
            Opts::new(
                "stratus_rebalance_moves_total",
                "Rebalancer move decisions per outcome",
            ),
            &["outcome"],
        )?;
        let rebalance_ticks_skipped = IntCounter::new(
            "stratus_rebalance_ticks_skipped_total",
            "Rebalancer ticks skipped because the previous tick was still running",
        )?;
        let pending_workloads = IntGauge::new(
            "stratus_pending_workloads",
            "Workloads waiting for placement",
        )?;

        registry.register(Box::new(collections.clone()))?;
        registry.register(Box::new(collection_failures.clone()))?;
        registry.register(Box::new(node_consecutive_failures.clone()))?;
        registry.register(Box::new(node_degraded.clone()))?;
        registry.register(Box::new(scoring_decisions.clone()))?;
        registry.register(Box::new(placement_score.clone()))?;
        registry.register(Box::new(bind_attempts.clone()))?;
        registry.register(Box::new(unbinds.clone()))?;
        registry.register(Box::new(rebalance_moves.clone()))?;
        registry.register(Box::new(rebalance_ticks_skipped.clone()))?;
        registry.register(Box::new(pending_workloads.clone()))?;

        Ok(Self {
            registry,
            collections,
            collection_failures,
            node_consecutive_failures,
            node_degraded,
            scoring_decisions,
            placement_score,
            bind_attempts,
            unbinds,
            rebalance_moves,
            rebalance_ticks_skipped,
            pending_workloads,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Successful collection; resets the node's failure gauges
    pub fn collection_succeeded(&self, node: &str) {
        self.collections.with_label_values(&["success"]).inc();
        self.node_consecutive_failures
            .with_label_values(&[node])
            .set(0);
        self.node_degraded.with_label_values(&[node]).set(0);
    }

    /// Failed collection of `kind` (e.g. "unreachable", "parse_failure")
    pub fn collection_failed(&self, node: &str, kind: &str, consecutive: u32, degraded: bool) {
        self.collections.with_label_values(&["failure"]).inc();
        self.collection_failures
            .with_label_values(&[node, kind])
            .inc();
        self.node_consecutive_failures
            .with_label_values(&[node])
            .set(i64::from(consecutive));
        self.node_degraded
            .with_label_values(&[node])
            .set(i64::from(degraded));
    }

    /// Drop per-node series when a node leaves the cluster
    pub fn forget_node(&self, node: &str) {
        let _ = self.node_consecutive_failures.remove_label_values(&[node]);
        let _ = self.node_degraded.remove_label_values(&[node]);
    }

    /// A scoring attempt ended with `outcome` ("placed", "no_eligible_node", ...)
    pub fn scoring_decision(&self, outcome: &str) {
        self.scoring_decisions.with_label_values(&[outcome]).inc();
    }

    pub fn observe_placement_score(&self, score: f64) {
        self.placement_score.observe(score);
    }

    /// A bind request ended with `outcome` ("success", "conflict", "timeout", "rejected")
    pub fn bind_attempt(&self, outcome: &str) {
        self.bind_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn unbind(&self, outcome: &str) {
        self.unbinds.with_label_values(&[outcome]).inc();
    }

    /// A rebalancer decision ended with `outcome` ("moved", "failed", "skipped_cooldown", "no_target")
    pub fn rebalance_move(&self, outcome: &str) {
        self.rebalance_moves.with_label_values(&[outcome]).inc();
    }

    pub fn rebalance_tick_skipped(&self) {
        self.rebalance_ticks_skipped.inc();
    }

    pub fn set_pending_workloads(&self, count: usize) {
        self.pending_workloads
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| MetricsError::Export {
            message: format!("Failed to convert metrics to string: {}", e),
        })
    }

    /// Content type of [`EngineMetrics::render`] output
    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}
