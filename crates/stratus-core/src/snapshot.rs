use crate::node::Capacity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Observed state of a single GPU device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuDevice {
    /// Device index as reported by the exporter's `gpu` label
    pub index: u32,
    pub utilization_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

impl GpuDevice {
    pub fn memory_free_bytes(&self) -> u64 {
        self.memory_total_bytes.saturating_sub(self.memory_used_bytes)
    }

    /// Fraction of device memory still free, in [0, 1]
    pub fn memory_free_fraction(&self) -> f64 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        self.memory_free_bytes() as f64 / self.memory_total_bytes as f64
    }
}

/// Point-in-time, immutable record of one node's resource usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_used_millicores: u64,
    pub memory_used_bytes: u64,
    /// Ordered by device index
    pub gpu_devices: Vec<GpuDevice>,
}

impl Snapshot {
    /// Age of the snapshot relative to `now`; zero if the timestamp is in the future
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the snapshot is too old to be used for scoring
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.age(now) > threshold
    }

    pub fn cpu_headroom(&self, capacity: &Capacity) -> u64 {
        capacity.cpu_millicores.saturating_sub(self.cpu_used_millicores)
    }

    pub fn memory_headroom(&self, capacity: &Capacity) -> u64 {
        capacity.memory_bytes.saturating_sub(self.memory_used_bytes)
    }

    /// CPU utilization in [0, 1]. A node with no CPU capacity counts as full.
    pub fn cpu_utilization(&self, capacity: &Capacity) -> f64 {
        utilization(self.cpu_used_millicores, capacity.cpu_millicores)
    }

    /// Memory utilization in [0, 1]. A node with no memory capacity counts as full.
    pub fn memory_utilization(&self, capacity: &Capacity) -> f64 {
        utilization(self.memory_used_bytes, capacity.memory_bytes)
    }

    /// Mean GPU utilization in [0, 1], or None when the node reports no GPUs
    pub fn gpu_utilization(&self) -> Option<f64> {
        if self.gpu_devices.is_empty() {
            return None;
        }
        let total: f64 = self
            .gpu_devices
            .iter()
            .map(|d| d.utilization_percent.clamp(0.0, 100.0))
            .sum();
        Some(total / self.gpu_devices.len() as f64 / 100.0)
    }
}

fn utilization(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 1.0;
    }
    (used as f64 / total as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_at(timestamp: DateTime<Utc>) -> Snapshot {
        Snapshot {
            timestamp,
            cpu_used_millicores: 1000,
            memory_used_bytes: 2 * 1024 * 1024 * 1024,
            gpu_devices: vec![
                GpuDevice {
                    index: 0,
                    utilization_percent: 40.0,
                    memory_used_bytes: 4,
                    memory_total_bytes: 16,
                },
                GpuDevice {
                    index: 1,
                    utilization_percent: 80.0,
                    memory_used_bytes: 12,
                    memory_total_bytes: 16,
                },
            ],
        }
    }

    #[test]
    fn test_staleness_boundary() {
        let now = Utc::now();
        let threshold = Duration::from_secs(60);

        let fresh = snapshot_at(now - chrono::Duration::seconds(60));
        assert!(!fresh.is_stale(now, threshold));

        let stale = snapshot_at(now - chrono::Duration::seconds(61));
        assert!(stale.is_stale(now, threshold));

        let future = snapshot_at(now + chrono::Duration::seconds(5));
        assert!(!future.is_stale(now, threshold));
    }

    #[test]
    fn test_utilization_and_headroom() {
        let capacity = Capacity {
            cpu_millicores: 4000,
            memory_bytes: 8 * 1024 * 1024 * 1024,
            gpu_count: 2,
            gpu_memory_bytes: 16,
        };
        let snap = snapshot_at(Utc::now());

        assert_eq!(snap.cpu_headroom(&capacity), 3000);
        assert!((snap.cpu_utilization(&capacity) - 0.25).abs() < 1e-9);
        assert!((snap.memory_utilization(&capacity) - 0.25).abs() < 1e-9);
        assert!((snap.gpu_utilization().unwrap() - 0.6).abs() < 1e-9);
        assert_eq!(snap.gpu_devices[1].memory_free_bytes(), 4);
    }

    #[test]
    fn test_zero_capacity_counts_as_full() {
        let snap = snapshot_at(Utc::now());
        assert_eq!(snap.cpu_utilization(&Capacity::default()), 1.0);
    }
}
