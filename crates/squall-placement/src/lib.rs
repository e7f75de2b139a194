//! Squall resource scheduler — first-fit placement by CPU and memory.
//!
//! This crate decides which node runs a new application and owns the
//! lifecycle edits that touch placement (update, restart, delete). It does
//! NOT start containers: the owning node's reconciler picks assignments up
//! from the store on its next tick.
//!
//! # Components
//!
//! - **`capacity`** — Per-node availability from snapshots and assignments
//! - **`placer`** — First-fit selection over candidate nodes
//! - **`scheduler`** — Serialized schedule/update/restart/delete

pub mod capacity;
pub mod error;
pub mod placer;
pub mod scheduler;

pub use capacity::{NodeCapacity, node_capacity};
pub use error::{SchedulerError, SchedulerResult};
pub use placer::first_fit;
pub use scheduler::ResourceScheduler;
