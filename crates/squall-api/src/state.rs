//! Shared state for API handlers.

use std::net::IpAddr;
use std::sync::Arc;

use squall_auth::TokenAuthority;
use squall_cluster::{MembershipTracker, PeerClient};
use squall_dns::ServiceResolver;
use squall_placement::ResourceScheduler;
use squall_reconcile::ContainerEngine;
use squall_state::{NodeAddress, Role, StateStore};

/// Who this daemon is.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub id: String,
    pub role: Role,
    /// Where this daemon is reachable by peers and operators.
    pub advertise: NodeAddress,
    /// Leader `host:port`; `None` on the leader itself.
    pub leader: Option<String>,
    /// The leader's node id, the only sender whose state pushes apply.
    pub leader_id: Option<String>,
}

impl NodeContext {
    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub node: NodeContext,
    pub store: StateStore,
    pub authority: TokenAuthority,
    pub scheduler: Arc<ResourceScheduler>,
    pub resolver: ServiceResolver,
    pub engine: Arc<dyn ContainerEngine>,
    pub peer: Arc<PeerClient>,
    /// Present on the leader only.
    pub tracker: Option<Arc<MembershipTracker>>,
    /// Sources accepted by local-only routes.
    pub allowed_ips: Arc<Vec<IpAddr>>,
}

impl ApiState {
    pub fn new(
        node: NodeContext,
        store: StateStore,
        engine: Arc<dyn ContainerEngine>,
        peer: Arc<PeerClient>,
    ) -> Self {
        Self {
            node,
            authority: TokenAuthority::new(store.clone()),
            scheduler: Arc::new(ResourceScheduler::new(store.clone())),
            resolver: ServiceResolver::new(store.clone()),
            store,
            engine,
            peer,
            tracker: None,
            allowed_ips: Arc::new(vec![
                IpAddr::from([127, 0, 0, 1]),
                IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 1]),
            ]),
        }
    }

    pub fn with_authority(mut self, authority: TokenAuthority) -> Self {
        self.authority = authority;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<MembershipTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_allowed_ips(mut self, allowed: Vec<IpAddr>) -> Self {
        self.allowed_ips = Arc::new(allowed);
        self
    }
}
