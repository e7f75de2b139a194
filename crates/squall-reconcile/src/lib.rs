//! squall-reconcile — the per-node loop that keeps containers converged.
//!
//! Every node, leader included, runs one [`Reconciler`]. On each tick it
//! reads the applications assigned to the node from the local store, asks
//! the container engine what is actually there, and closes the gap:
//!
//! ```text
//!   store (desired) ──┐
//!                     ├─► diff ─► deploy / destroy ─► stats ─► store (status)
//!   engine (actual) ──┘
//! ```
//!
//! Running state is never cached between ticks. Managed containers carry
//! their application id and a spec digest as labels, so a restarted daemon
//! picks up exactly where the previous one left off.
//!
//! The engine is reached only through the [`ContainerEngine`] trait; the
//! production implementation ([`CliEngine`]) shells out to `docker` or
//! `podman`.

pub mod cli;
pub mod engine;
pub mod error;
pub mod mounts;
pub mod reconciler;
pub mod system;

pub use cli::CliEngine;
pub use engine::{ContainerEngine, ContainerStats, ContainerSummary, LABEL_APP, LABEL_DIGEST, MountBinding};
pub use error::{EngineError, EngineResult};
pub use reconciler::{Reconciler, ReconcilerConfig, TickReport};
pub use system::{HostProbe, HostSnapshot, Reservation, SystemProbe, system_info};
