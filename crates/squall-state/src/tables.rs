//! redb table definitions for the Squall record store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types), except the token sets whose values are the issue timestamp.

use redb::TableDefinition;

/// Applications keyed by `{application_id}`.
pub const APPLICATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("applications");

/// Nodes keyed by `{node_id}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Per-daemon `ClientState` keyed by `{node_id}`.
pub const CLIENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("clients");

/// Routes keyed by `{route_id}`.
pub const ROUTES: TableDefinition<&str, &[u8]> = TableDefinition::new("routes");

/// Access/refresh pairs keyed by the subject they were issued to.
pub const TOKEN_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("token_records");

/// Outstanding join tokens → issue time.
pub const JOIN_TOKENS: TableDefinition<&str, u64> = TableDefinition::new("join_tokens");

/// Live API tokens → issue time.
pub const API_TOKENS: TableDefinition<&str, u64> = TableDefinition::new("api_tokens");

/// Singleton records (membership lists) keyed by name.
pub const CLUSTER: TableDefinition<&str, &[u8]> = TableDefinition::new("cluster");

/// Key of the leader's membership lists in [`CLUSTER`].
pub const MEMBERSHIP_KEY: &str = "membership";
