use squall_state::StateError;
use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Failures of one call to a peer daemon.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot reach {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("request to {address} timed out")]
    Timeout { address: String },

    #[error("{address} answered {status}: {message}")]
    Status {
        address: String,
        status: u16,
        message: String,
    },

    #[error("malformed response from {address}: {reason}")]
    Decode { address: String, reason: String },

    #[error("no credentials; join the cluster first")]
    NoCredentials,

    #[error("credential renewal failed: {0}")]
    Renewal(String),

    #[error("credentials file: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// HTTP status of a non-2xx answer, if that is what failed.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("no node listens on {host}:{port}")]
    UnknownNode { host: String, port: u16 },

    /// A follower tried to register under the leader's id.
    #[error("node id {0} belongs to the leader")]
    LeaderIdentity(String),

    #[error("{0} lists no leader node")]
    NoLeader(String),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
