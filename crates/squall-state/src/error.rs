//! Record store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open record store: {0}")]
    Open(String),

    /// Begin or commit failed.
    #[error("store transaction failed: {0}")]
    Transaction(String),

    #[error("cannot open table: {0}")]
    Table(String),

    /// A row read or write failed inside an open transaction.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("cannot encode record: {0}")]
    Encode(String),

    #[error("corrupt record: {0}")]
    Decode(String),

    /// A checked insert found the port already exposed by another application.
    #[error("port {port} already claimed by application {owner}")]
    PortClaimed { port: u16, owner: String },

    /// A checked insert found the alias already used in the namespace.
    #[error("alias {alias} already exists in {namespace} (route {owner})")]
    AliasClaimed {
        alias: String,
        namespace: String,
        owner: String,
    },
}
