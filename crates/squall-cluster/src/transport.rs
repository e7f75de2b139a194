//! The calls the leader makes to its followers.

use async_trait::async_trait;
use squall_state::{Application, Node, SyncPackage, SystemInfo};

use crate::error::TransportResult;
use crate::peer::PeerClient;

/// Leader → follower operations used by the membership tracker.
#[async_trait]
pub trait FollowerTransport: Send + Sync {
    /// `GET /api/health`: liveness plus the follower's resource figures.
    async fn health(&self, node: &Node) -> TransportResult<SystemInfo>;

    /// `POST /api/state`: overwrite the follower's mirror.
    async fn push_state(&self, node: &Node, package: &SyncPackage) -> TransportResult<()>;

    /// `GET /api/application/local`: what the follower observes for its apps.
    async fn local_applications(&self, node: &Node) -> TransportResult<Vec<Application>>;
}

#[async_trait]
impl FollowerTransport for PeerClient {
    async fn health(&self, node: &Node) -> TransportResult<SystemInfo> {
        self.get_json(&node.address(), "/api/health").await
    }

    async fn push_state(&self, node: &Node, package: &SyncPackage) -> TransportResult<()> {
        self.post(&node.address(), "/api/state", package).await
    }

    async fn local_applications(&self, node: &Node) -> TransportResult<Vec<Application>> {
        self.get_json(&node.address(), "/api/application/local").await
    }
}
