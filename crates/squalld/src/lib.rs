//! squalld — the Squall daemon library.
//!
//! The binary is a thin wrapper; leader and follower assembly live here so
//! tests can drive both modes in-process.

pub mod config;
pub mod follower;
pub mod leader;
pub mod telemetry;

pub use config::{DEFAULT_PORT, DaemonConfig, LogFormat, Overrides};
pub use follower::FollowerDaemon;
pub use leader::LeaderDaemon;
