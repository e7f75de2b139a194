//! squall-state — the record store shared by every Squall daemon.
//!
//! Backed by [redb](https://docs.rs/redb). The leader's store is the
//! authoritative copy; followers hold a mirror that the leader overwrites
//! with a [`SyncPackage`] on every membership pass.
//!
//! # Architecture
//!
//! ```text
//!  leader                               follower
//!  ┌──────────────┐  POST /api/state   ┌──────────────┐
//!  │ StateStore   │ ─────────────────► │ StateStore   │
//!  │ (authority)  │   SyncPackage      │ (mirror)     │
//!  └──────────────┘                    └──────────────┘
//! ```
//!
//! Operations that must be exactly-once (join redemption, token rotation,
//! port-checked inserts) each run inside a single redb write transaction;
//! redb admits one writer at a time, which serializes them.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
