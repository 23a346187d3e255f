use crate::{Result, StratusError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Score given when a workload declares no affinity preference
pub const NEUTRAL_AFFINITY_SCORE: f64 = 50.0;

/// Score given for an exact class match
pub const EXACT_MATCH_SCORE: f64 = 100.0;

/// Intended role of a node, or the role a workload prefers to run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffinityClass {
    /// Control-plane style coordination services
    Coordination,
    /// GPU training jobs
    Training,
    /// Latency-sensitive model serving
    Inference,
    /// Data and storage services
    Storage,
    /// General purpose compute
    General,
}

impl AffinityClass {
    pub const ALL: [AffinityClass; 5] = [
        AffinityClass::Coordination,
        AffinityClass::Training,
        AffinityClass::Inference,
        AffinityClass::Storage,
        AffinityClass::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AffinityClass::Coordination => "coordination",
            AffinityClass::Training => "training",
            AffinityClass::Inference => "inference",
            AffinityClass::Storage => "storage",
            AffinityClass::General => "general",
        }
    }
}

impl std::fmt::Display for AffinityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AffinityClass {
    type Err = StratusError;

    fn from_str(s: &str) -> Result<Self> {
        AffinityClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| {
                StratusError::invalid_config(
                    format!("unknown affinity class '{}'", s),
                    "Use one of: coordination, training, inference, storage, general",
                )
            })
    }
}

/// One row of the compatibility table as it appears in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityEntry {
    /// Class the workload prefers
    pub workload: AffinityClass,
    /// Class declared by the node
    pub node: AffinityClass,
    /// Score in [0, 100]
    pub score: f64,
}

/// Partial-match scores between a preferred class and a node class.
///
/// Exact matches always score 100. Pairs absent from the table score 0.
#[derive(Debug, Clone, PartialEq)]
pub struct CompatibilityTable {
    scores: BTreeMap<(AffinityClass, AffinityClass), f64>,
}

impl Default for CompatibilityTable {
    fn default() -> Self {
        use AffinityClass::*;

        let mut scores = BTreeMap::new();
        for class in AffinityClass::ALL {
            scores.insert((class, class), EXACT_MATCH_SCORE);
        }
        // Both are GPU-heavy roles, so the hardware usually suits either
        scores.insert((Training, Inference), 60.0);
        scores.insert((Inference, Training), 60.0);
        scores.insert((Coordination, General), 40.0);
        scores.insert((Storage, General), 40.0);
        scores.insert((Inference, General), 30.0);
        scores.insert((Training, General), 20.0);
        scores.insert((General, Coordination), 30.0);
        scores.insert((General, Storage), 30.0);

        Self { scores }
    }
}

impl CompatibilityTable {
    /// Build the default table with configured rows layered on top.
    ///
    /// Rejects scores outside [0, 100], exact-match rows that are not 100, and
    /// the same pair configured twice.
    pub fn with_overrides(entries: &[CompatibilityEntry]) -> Result<Self> {
        let mut table = Self::default();
        let mut seen = BTreeMap::new();

        for entry in entries {
            if !entry.score.is_finite() || !(0.0..=100.0).contains(&entry.score) {
                return Err(StratusError::invalid_config(
                    format!(
                        "affinity compatibility score for {} -> {} is {}, outside [0, 100]",
                        entry.workload, entry.node, entry.score
                    ),
                    "Compatibility scores are percentages between 0 and 100",
                ));
            }

            if entry.workload == entry.node && entry.score != EXACT_MATCH_SCORE {
                return Err(StratusError::invalid_config(
                    format!(
                        "exact match {} -> {} must score 100, got {}",
                        entry.workload, entry.node, entry.score
                    ),
                    "Remove the row; exact class matches always score 100",
                ));
            }

            if seen.insert((entry.workload, entry.node), entry.score).is_some() {
                return Err(StratusError::invalid_config(
                    format!(
                        "affinity pair {} -> {} is configured more than once",
                        entry.workload, entry.node
                    ),
                    "Keep a single row per (workload, node) pair",
                ));
            }

            table.scores.insert((entry.workload, entry.node), entry.score);
        }

        Ok(table)
    }

    /// Score for a single (preferred, node) pair
    pub fn lookup(&self, preferred: AffinityClass, node: AffinityClass) -> f64 {
        self.scores.get(&(preferred, node)).copied().unwrap_or(0.0)
    }

    /// Affinity sub-score of a node for a workload's preference list.
    ///
    /// Empty preference list is neutral (50). A node without a declared class
    /// matches nothing.
    pub fn score(&self, preferred: &[AffinityClass], node: Option<AffinityClass>) -> f64 {
        if preferred.is_empty() {
            return NEUTRAL_AFFINITY_SCORE;
        }

        let Some(node) = node else {
            return 0.0;
        };

        preferred
            .iter()
            .map(|class| self.lookup(*class, node))
            .fold(0.0, f64::max)
    }

    /// Rows of the table, in deterministic order
    pub fn entries(&self) -> Vec<CompatibilityEntry> {
        self.scores
            .iter()
            .map(|((workload, node), score)| CompatibilityEntry {
                workload: *workload,
                node: *node,
                score: *score,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_affinity_class() {
        assert_eq!(
            "training".parse::<AffinityClass>().unwrap(),
            AffinityClass::Training
        );
        assert!("quantum".parse::<AffinityClass>().is_err());
    }

    #[test]
    fn test_score_exact_partial_and_neutral() {
        let table = CompatibilityTable::default();

        assert_eq!(
            table.score(&[AffinityClass::Training], Some(AffinityClass::Training)),
            100.0
        );
        assert_eq!(
            table.score(&[AffinityClass::Training], Some(AffinityClass::Inference)),
            60.0
        );
        assert_eq!(
            table.score(&[AffinityClass::Training], Some(AffinityClass::Storage)),
            0.0
        );
        assert_eq!(table.score(&[], Some(AffinityClass::Storage)), 50.0);
        assert_eq!(table.score(&[AffinityClass::Training], None), 0.0);
    }

    #[test]
    fn test_score_takes_best_preference() {
        let table = CompatibilityTable::default();
        let preferred = [AffinityClass::Storage, AffinityClass::Inference];
        assert_eq!(table.score(&preferred, Some(AffinityClass::Inference)), 100.0);
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let table = CompatibilityTable::with_overrides(&[CompatibilityEntry {
            workload: AffinityClass::Training,
            node: AffinityClass::Inference,
            score: 80.0,
        }])
        .unwrap();
        assert_eq!(
            table.lookup(AffinityClass::Training, AffinityClass::Inference),
            80.0
        );
    }

    #[test]
    fn test_malformed_overrides_rejected() {
        let out_of_range = CompatibilityEntry {
            workload: AffinityClass::Training,
            node: AffinityClass::General,
            score: 140.0,
        };
        assert!(CompatibilityTable::with_overrides(&[out_of_range]).is_err());

        let weak_identity = CompatibilityEntry {
            workload: AffinityClass::Storage,
            node: AffinityClass::Storage,
            score: 70.0,
        };
        assert!(CompatibilityTable::with_overrides(&[weak_identity]).is_err());

        let row = CompatibilityEntry {
            workload: AffinityClass::General,
            node: AffinityClass::Training,
            score: 10.0,
        };
        assert!(CompatibilityTable::with_overrides(&[row.clone(), row]).is_err());
    }
}
