//! Builders for synthetic nodes, snapshots and workloads

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use stratus_core::{
    Capacity, GpuDevice, GpuRequirementMode, Node, ResourceRequirements, Snapshot, SnapshotStore,
    Workload,
};

pub const GIB: u64 = 1 << 30;

pub fn node(id: &str, cores: u64, memory_gib: u64, gpus: u32) -> Node {
    Node::new(
        id,
        Capacity {
            cpu_millicores: cores * 1000,
            memory_bytes: memory_gib * GIB,
            gpu_count: gpus,
            gpu_memory_bytes: if gpus > 0 { 16 * GIB } else { 0 },
        },
        format!("http://{}:9100/metrics", id),
    )
}

pub fn gpu(index: u32, utilization_percent: f64, used_gib: u64, total_gib: u64) -> GpuDevice {
    GpuDevice {
        index,
        utilization_percent,
        memory_used_bytes: used_gib * GIB,
        memory_total_bytes: total_gib * GIB,
    }
}

pub fn snapshot(cpu_used_millicores: u64, memory_used_gib: u64, gpu_devices: Vec<GpuDevice>) -> Snapshot {
    Snapshot {
        timestamp: Utc::now(),
        cpu_used_millicores,
        memory_used_bytes: memory_used_gib * GIB,
        gpu_devices,
    }
}

pub fn workload(id: &str, cpu_millicores: u64, memory_gib: u64) -> Workload {
    Workload::new(
        id,
        ResourceRequirements {
            cpu_millicores,
            memory_bytes: memory_gib * GIB,
            gpu_count: 0,
            min_gpu_memory_bytes: 0,
        },
    )
}

pub fn gpu_workload(id: &str, gpu_count: u32, min_free_gib: u64, mode: GpuRequirementMode) -> Workload {
    let mut w = workload(id, 1000, 2);
    w.requirements.gpu_count = gpu_count;
    w.requirements.min_gpu_memory_bytes = min_free_gib * GIB;
    w.gpu_mode = mode;
    w
}

pub fn store_with(nodes: Vec<(Node, Snapshot)>) -> Arc<SnapshotStore> {
    let store = Arc::new(SnapshotStore::new(Duration::from_secs(60), 3));
    for (node, snapshot) in nodes {
        let id = node.id.clone();
        store.upsert_node(node);
        store.record_snapshot(&id, snapshot).unwrap();
    }
    store
}
