use crate::affinity::{AffinityClass, CompatibilityEntry, CompatibilityTable};
use crate::node::{Capacity, Node};
use crate::resources::ResourceQuantities;
use crate::{Result, StratusError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Top-level engine configuration, loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub collector: CollectorConfig,
    pub scorer: ScorerConfig,
    pub binder: BinderConfig,
    pub rebalancer: RebalancerConfig,
    pub scheduler: SchedulerLoopConfig,
    /// Time allowed for in-flight work to drain on shutdown
    pub shutdown_grace_secs: u64,
    /// Initial node inventory
    pub nodes: Vec<NodeSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            collector: CollectorConfig::default(),
            scorer: ScorerConfig::default(),
            binder: BinderConfig::default(),
            rebalancer: RebalancerConfig::default(),
            scheduler: SchedulerLoopConfig::default(),
            shutdown_grace_secs: 10,
            nodes: Vec::new(),
        }
    }
}

/// Configuration for the metrics collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    pub tick_secs: u64,
    pub request_timeout_secs: u64,
    /// Snapshots older than this are never used for scoring
    pub staleness_secs: u64,
    /// Upper bound on concurrent collections
    pub max_in_flight: usize,
    pub degraded_after_failures: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            tick_secs: 15,
            request_timeout_secs: 5,
            staleness_secs: 60,
            max_in_flight: 50,
            degraded_after_failures: 3,
        }
    }
}

impl CollectorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }

    /// Concurrency for a tick over `node_count` nodes: min(node count, cap), at least 1
    pub fn effective_in_flight(&self, node_count: usize) -> usize {
        node_count.min(self.max_in_flight).max(1)
    }
}

/// Weights of the three placement sub-scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoreWeights {
    pub headroom: f64,
    pub affinity: f64,
    pub gpu: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            headroom: 0.4,
            affinity: 0.3,
            gpu: 0.3,
        }
    }
}

/// Configuration for the placement scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScorerConfig {
    pub weights: ScoreWeights,
    /// A GPU at or above this utilization does not count as free
    pub gpu_saturation_percent: f64,
    /// Rows layered over the built-in compatibility table
    pub affinity_compatibility: Vec<CompatibilityEntry>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            gpu_saturation_percent: 90.0,
            affinity_compatibility: Vec::new(),
        }
    }
}

impl ScorerConfig {
    pub fn compatibility_table(&self) -> Result<CompatibilityTable> {
        CompatibilityTable::with_overrides(&self.affinity_compatibility)
    }
}

/// Configuration for the binding executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BinderConfig {
    pub request_timeout_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    /// Attempts before a timing-out bind becomes terminal
    pub max_attempts: u32,
    /// Immediate rescoring rounds after a conflict within one cycle
    pub max_conflict_rescores: u32,
    /// How long Completed, Failed and Evicted workloads stay queryable
    pub retain_finished_secs: u64,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            backoff_base_secs: 1,
            backoff_cap_secs: 30,
            max_attempts: 5,
            max_conflict_rescores: 3,
            retain_finished_secs: 3600,
        }
    }
}

impl BinderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retain_finished(&self) -> Duration {
        Duration::from_secs(self.retain_finished_secs)
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let secs = self
            .backoff_base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_cap_secs);
        Duration::from_secs(secs)
    }
}

/// Configuration for the rebalancer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RebalancerConfig {
    pub tick_secs: u64,
    /// Percentage points above/below the cluster average that make a node hot/cold
    pub threshold_percent: f64,
    /// A workload is not moved again within this window
    pub cooldown_secs: u64,
    /// Consecutive hot ticks before a node's workloads are moved
    pub hot_ticks_required: u32,
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            threshold_percent: 20.0,
            cooldown_secs: 600,
            hot_ticks_required: 1,
        }
    }
}

impl RebalancerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Configuration for the scheduling loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerLoopConfig {
    pub cycle_secs: u64,
}

impl Default for SchedulerLoopConfig {
    fn default() -> Self {
        Self { cycle_secs: 5 }
    }
}

impl SchedulerLoopConfig {
    pub fn cycle(&self) -> Duration {
        Duration::from_secs(self.cycle_secs)
    }
}

/// A node as written in the inventory, with human-readable quantities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    pub id: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub affinity_class: Option<AffinityClass>,
    /// e.g. "8" or "7500m"
    pub cpu: String,
    /// e.g. "32Gi"
    pub memory: String,
    #[serde(default)]
    pub gpus: u32,
    /// Memory per GPU, e.g. "16Gi"
    #[serde(default)]
    pub gpu_memory: Option<String>,
    pub metrics_url: String,
}

impl NodeSpec {
    pub fn to_node(&self) -> Result<Node> {
        let quantities = ResourceQuantities::parse(&self.cpu, &self.memory)?;
        let gpu_memory_bytes = match &self.gpu_memory {
            Some(s) => ResourceQuantities::parse_memory(s)?,
            None => 0,
        };

        Ok(Node {
            id: self.id.clone(),
            tags: self.tags.clone(),
            affinity_class: self.affinity_class,
            capacity: Capacity {
                cpu_millicores: quantities.cpu_millicores,
                memory_bytes: quantities.memory_bytes,
                gpu_count: self.gpus,
                gpu_memory_bytes,
            },
            metrics_url: self.metrics_url.clone(),
        })
    }
}

impl EngineConfig {
    /// Read, parse and validate a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from {}", path.display());

        let raw = std::fs::read_to_string(path).map_err(|e| {
            StratusError::invalid_config(
                format!("cannot read {}: {}", path.display(), e),
                "Check the --config path and file permissions",
            )
        })?;

        Self::from_yaml_str(&raw)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(raw).map_err(|e| {
            StratusError::invalid_config(
                format!("malformed configuration: {}", e),
                "Compare the file against the documented configuration sections",
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Inventory nodes with parsed quantities
    pub fn inventory(&self) -> Result<Vec<Node>> {
        self.nodes.iter().map(NodeSpec::to_node).collect()
    }

    /// Reject configurations the engine must not start with
    pub fn validate(&self) -> Result<()> {
        let weights = &self.scorer.weights;
        let all = [weights.headroom, weights.affinity, weights.gpu];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(StratusError::invalid_config(
                "score weights must be finite and non-negative",
                "Use weights such as headroom: 0.4, affinity: 0.3, gpu: 0.3",
            ));
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err(StratusError::invalid_config(
                "score weights are all zero",
                "At least one sub-score must carry weight",
            ));
        }

        let saturation = self.scorer.gpu_saturation_percent;
        if !saturation.is_finite() || saturation <= 0.0 || saturation > 100.0 {
            return Err(StratusError::invalid_config(
                format!("gpu_saturation_percent {} is outside (0, 100]", saturation),
                "Use a utilization percentage such as 90",
            ));
        }

        self.scorer.compatibility_table()?;

        let threshold = self.rebalancer.threshold_percent;
        if !threshold.is_finite() || threshold <= 0.0 || threshold > 100.0 {
            return Err(StratusError::invalid_config(
                format!("rebalancer threshold_percent {} is outside (0, 100]", threshold),
                "Use percentage points such as 20",
            ));
        }

        let intervals = [
            ("collector.tick_secs", self.collector.tick_secs),
            ("collector.request_timeout_secs", self.collector.request_timeout_secs),
            ("collector.staleness_secs", self.collector.staleness_secs),
            ("binder.request_timeout_secs", self.binder.request_timeout_secs),
            ("rebalancer.tick_secs", self.rebalancer.tick_secs),
            ("scheduler.cycle_secs", self.scheduler.cycle_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(StratusError::invalid_config(
                    format!("{} must be greater than zero", name),
                    "Intervals and timeouts are whole seconds >= 1",
                ));
            }
        }

        let counts = [
            ("collector.max_in_flight", self.collector.max_in_flight as u64),
            (
                "collector.degraded_after_failures",
                self.collector.degraded_after_failures as u64,
            ),
            ("binder.max_attempts", self.binder.max_attempts as u64),
            (
                "rebalancer.hot_ticks_required",
                self.rebalancer.hot_ticks_required as u64,
            ),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(StratusError::invalid_config(
                    format!("{} must be at least 1", name),
                    "Counts and limits start at 1",
                ));
            }
        }

        let mut seen = HashSet::new();
        for spec in &self.nodes {
            if spec.id.trim().is_empty() {
                return Err(StratusError::invalid_config(
                    "node with empty id in inventory",
                    "Every node needs a unique id",
                ));
            }
            if !seen.insert(spec.id.as_str()) {
                return Err(StratusError::invalid_config(
                    format!("node '{}' appears twice in inventory", spec.id),
                    "Node ids must be unique",
                ));
            }
            spec.to_node()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
collector:
  tick_secs: 10
scorer:
  weights:
    headroom: 0.5
    affinity: 0.25
    gpu: 0.25
  affinity_compatibility:
    - workload: training
      node: inference
      score: 75
rebalancer:
  cooldown_secs: 300
nodes:
  - id: gpu-1
    affinity_class: training
    tags: [rack-a]
    cpu: "8"
    memory: 16Gi
    gpus: 1
    gpu_memory: 16Gi
    metrics_url: http://gpu-1:9400/metrics
"#;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.collector.tick(), Duration::from_secs(15));
        assert_eq!(config.collector.staleness(), Duration::from_secs(60));
        assert_eq!(config.rebalancer.cooldown(), Duration::from_secs(600));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
        assert_eq!(config.scorer.weights, ScoreWeights::default());
    }

    #[test]
    fn test_partial_file_keeps_remaining_defaults() {
        let config = EngineConfig::from_yaml_str("binder:\n  max_attempts: 2\n").unwrap();
        assert_eq!(config.binder.max_attempts, 2);
        assert_eq!(config.binder.retain_finished(), Duration::from_secs(3600));
        assert_eq!(config.shutdown_grace_secs, 10);

        let config = EngineConfig::from_yaml_str("shutdown_grace_secs: 30\n").unwrap();
        assert_eq!(config.shutdown_grace(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_sample() {
        let config = EngineConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.collector.tick_secs, 10);
        assert_eq!(config.collector.staleness_secs, 60);
        assert_eq!(config.scorer.weights.headroom, 0.5);

        let nodes = config.inventory().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].capacity.cpu_millicores, 8000);
        assert_eq!(nodes[0].capacity.gpu_memory_bytes, 16 << 30);
        assert_eq!(nodes[0].affinity_class, Some(AffinityClass::Training));

        let table = config.scorer.compatibility_table().unwrap();
        assert_eq!(
            table.lookup(AffinityClass::Training, AffinityClass::Inference),
            75.0
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.nodes[0].id, "gpu-1");
    }

    #[test]
    fn test_malformed_compatibility_table_is_fatal() {
        let raw = r#"
scorer:
  affinity_compatibility:
    - workload: training
      node: general
      score: 250
"#;
        let err = EngineConfig::from_yaml_str(raw).unwrap_err();
        assert!(matches!(err, StratusError::InvalidConfig { .. }));

        let unknown_class = r#"
scorer:
  affinity_compatibility:
    - workload: mining
      node: general
      score: 10
"#;
        assert!(EngineConfig::from_yaml_str(unknown_class).is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.scorer.weights = ScoreWeights {
            headroom: 0.0,
            affinity: 0.0,
            gpu: 0.0,
        };
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.collector.tick_secs = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.rebalancer.threshold_percent = -5.0;
        assert!(config.validate().is_err());

        assert!(EngineConfig::from_yaml_str("collector:\n  bogus: 1\n").is_err());
    }

    #[test]
    fn test_duplicate_inventory_rejected() {
        let spec = NodeSpec {
            id: "n1".to_string(),
            tags: BTreeSet::new(),
            affinity_class: None,
            cpu: "4".to_string(),
            memory: "8Gi".to_string(),
            gpus: 0,
            gpu_memory: None,
            metrics_url: "http://n1/metrics".to_string(),
        };
        let config = EngineConfig {
            nodes: vec![spec.clone(), spec],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_schedule() {
        let binder = BinderConfig::default();
        let delays: Vec<u64> = (1..=7).map(|a| binder.backoff(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_effective_in_flight() {
        let collector = CollectorConfig::default();
        assert_eq!(collector.effective_in_flight(0), 1);
        assert_eq!(collector.effective_in_flight(7), 7);
        assert_eq!(collector.effective_in_flight(500), 50);
    }
}
