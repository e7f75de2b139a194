//! First-fit selection.
//!
//! Candidates are examined in the order given (registration order) and the
//! first node with room wins. No scoring, no spreading.

use tracing::debug;

use crate::capacity::NodeCapacity;

/// The first candidate that can take `cpu` cores and `memory` bytes.
pub fn first_fit(candidates: &[NodeCapacity], cpu: f64, memory: u64) -> Option<&NodeCapacity> {
    candidates.iter().find(|node| {
        let fits = node.fits(cpu, memory);
        debug!(
            node = %node.node_id,
            free_cpu = node.free_cpu(),
            free_memory = node.free_memory(),
            fits,
            "first-fit candidate"
        );
        fits
    })
}
