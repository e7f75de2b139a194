//! Node availability for placement decisions.
//!
//! A node's allocatable CPU and memory come from the last system snapshot
//! it reported. What is already assigned is summed from the store, so an
//! application placed a moment ago counts even before the node reports
//! again.

use squall_state::{Application, Node};

/// Slack for summing fractional CPU limits.
const CPU_EPSILON: f64 = 1e-9;

/// Availability of a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCapacity {
    pub node_id: String,
    pub cpu_allocatable: f64,
    pub memory_allocatable: u64,
    pub cpu_assigned: f64,
    pub memory_assigned: u64,
}

impl NodeCapacity {
    pub fn free_cpu(&self) -> f64 {
        (self.cpu_allocatable - self.cpu_assigned).max(0.0)
    }

    pub fn free_memory(&self) -> u64 {
        self.memory_allocatable.saturating_sub(self.memory_assigned)
    }

    /// True if the node can take `cpu` cores and `memory` bytes more.
    pub fn fits(&self, cpu: f64, memory: u64) -> bool {
        self.free_cpu() + CPU_EPSILON >= cpu && self.free_memory() >= memory
    }
}

/// Build the availability of `node` given every application in the store.
pub fn node_capacity(node: &Node, applications: &[Application]) -> NodeCapacity {
    let (cpu_assigned, memory_assigned) = applications
        .iter()
        .filter(|app| app.node == node.id)
        .fold((0.0, 0u64), |(cpu, mem), app| {
            (cpu + app.cpu, mem.saturating_add(app.memory))
        });
    NodeCapacity {
        node_id: node.id.clone(),
        cpu_allocatable: node.system.cpu_allocatable,
        memory_allocatable: node.system.memory_allocatable,
        cpu_assigned,
        memory_assigned,
    }
}
