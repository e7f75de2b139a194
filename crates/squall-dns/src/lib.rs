//! Squall service resolution.
//!
//! Maps `{hostname}.{namespace}.{suffix}` names to the host of the node
//! running the matching application. Only the local replica of the store
//! is consulted, so every daemon can answer on its own.

pub mod resolver;

pub use resolver::{ResolveError, ResolveResult, ServiceName, ServiceResolver, parse_fqdn};
