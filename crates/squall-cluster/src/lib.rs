//! Squall cluster coordination — how daemons find and talk to each other.
//!
//! The leader keeps a [`MembershipTracker`] that probes every follower,
//! pushes the replicated state to the ones that answer, and pulls back
//! the application statuses they observe. Followers run a
//! [`FollowerAgent`] to join and leave. All daemon-to-daemon calls go
//! through [`PeerClient`], which carries credentials and renews them when
//! the far side answers `406`.
//!
//! # Components
//!
//! - **`wire`** — One-shot HTTP/1 exchanges and the JSON envelope
//! - **`peer`** — Authenticated calls with renew-and-retry
//! - **`transport`** — The leader → follower operations, as a trait
//! - **`probe`** — Retry policy for liveness probes
//! - **`membership`** — Succession, unhealthy and unknown lists
//! - **`agent`** — Follower join/leave

pub mod agent;
pub mod error;
pub mod membership;
pub mod peer;
pub mod probe;
pub mod transport;
pub mod wire;

pub use agent::{AgentConfig, FollowerAgent};
pub use error::{ClusterError, ClusterResult, TransportError, TransportResult};
pub use membership::MembershipTracker;
pub use peer::{PeerClient, Renewal};
pub use probe::{ProbePolicy, probe_with_retry};
pub use transport::FollowerTransport;
pub use wire::{API_TOKEN_HEADER, Envelope, Reply};
