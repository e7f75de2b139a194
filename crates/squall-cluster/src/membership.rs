//! MembershipTracker — the leader's view of its followers.
//!
//! Followers live in one of three lists: `succession` (answering probes
//! and accepting state), `unhealthy` (answering probes but refusing state)
//! and `unknown` (not answering). Every change to the lists happens inside
//! one probe-and-classify pass, and passes are serialized on the
//! succession lock, so a registration arriving during a slow pass waits
//! for it instead of being overwritten by it.

use std::sync::Arc;
use std::time::Duration;

use squall_reconcile::Reconciler;
use squall_state::{
    ClientState, ClusterMembership, Node, NodeHealth, Role, StateStore, epoch_secs,
};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{ClusterError, ClusterResult};
use crate::probe::{ProbePolicy, probe_with_retry};
use crate::transport::FollowerTransport;

pub struct MembershipTracker {
    store: StateStore,
    leader: Node,
    transport: Arc<dyn FollowerTransport>,
    reconciler: Option<Arc<Reconciler>>,
    policy: ProbePolicy,
    /// The succession lock.
    lists: Mutex<ClusterMembership>,
}

impl MembershipTracker {
    /// Record `leader` as the first node and resume from the persisted lists.
    pub fn new(
        store: StateStore,
        leader: Node,
        transport: Arc<dyn FollowerTransport>,
    ) -> ClusterResult<Self> {
        let leader = store.register_node(&Node {
            role: Role::Leader,
            health: NodeHealth::Healthy,
            ..leader
        })?;

        let mut lists = store.get_membership()?;
        for list in [&mut lists.succession, &mut lists.unhealthy, &mut lists.unknown] {
            list.retain(|n| n.id != leader.id);
        }
        info!(
            leader = %leader.id,
            followers = lists.all_nodes().len(),
            "membership tracker ready"
        );

        Ok(Self {
            store,
            leader,
            transport,
            reconciler: None,
            policy: ProbePolicy::default(),
            lists: Mutex::new(lists),
        })
    }

    /// Drive the leader's own reconciler from each pass.
    pub fn with_reconciler(mut self, reconciler: Arc<Reconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn with_policy(mut self, policy: ProbePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn leader(&self) -> &Node {
        &self.leader
    }

    /// Current lists. Waits for a running pass to finish.
    pub async fn membership(&self) -> ClusterMembership {
        self.lists.lock().await.clone()
    }

    /// Admit a follower and classify the cluster with it.
    pub async fn register_follower(&self, node: Node) -> ClusterResult<Node> {
        if node.id == self.leader.id {
            warn!(address = %node.address(), "registration under the leader's id refused");
            return Err(ClusterError::LeaderIdentity(node.id));
        }
        let mut lists = self.lists.lock().await;

        let stored = self.store.register_node(&Node {
            role: Role::Follower,
            health: NodeHealth::Unknown,
            ..node
        })?;
        remove_id(&mut lists, &stored.id);
        lists.succession.push(stored.clone());
        info!(node = %stored.id, address = %stored.address(), ordinal = stored.ordinal, "follower registered");

        self.classify(&mut lists).await?;
        Ok(stored)
    }

    /// Drop the follower listening on `host:port`.
    pub async fn deregister_follower(&self, host: &str, port: u16) -> ClusterResult<Node> {
        let mut lists = self.lists.lock().await;

        let node = lists
            .all_nodes()
            .into_iter()
            .find(|n| n.host == host && n.port == port)
            .ok_or_else(|| ClusterError::UnknownNode {
                host: host.to_string(),
                port,
            })?;
        remove_id(&mut lists, &node.id);
        self.store.delete_node(&node.id)?;
        info!(node = %node.id, address = %node.address(), "follower deregistered");

        self.classify(&mut lists).await?;
        Ok(node)
    }

    /// One timer-driven pass.
    pub async fn probe_pass(&self) -> ClusterResult<ClusterMembership> {
        let mut lists = self.lists.lock().await;
        self.classify(&mut lists).await?;
        Ok(lists.clone())
    }

    /// Pass forever on a fixed interval. Failures are logged, never fatal.
    pub async fn run(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?every, "membership loop started");
        loop {
            interval.tick().await;
            match self.probe_pass().await {
                Ok(lists) => debug!(
                    succession = lists.succession.len(),
                    unhealthy = lists.unhealthy.len(),
                    unknown = lists.unknown.len(),
                    "membership pass"
                ),
                Err(e) => warn!(error = %e, "membership pass failed"),
            }
        }
    }

    /// Probe, push, merge, reconcile, persist. Caller holds the lock.
    async fn classify(&self, lists: &mut ClusterMembership) -> ClusterResult<()> {
        let candidates: Vec<Node> = lists
            .all_nodes()
            .into_iter()
            .filter(|n| n.id != self.leader.id)
            .collect();

        let mut reachable = Vec::new();
        let mut unknown = Vec::new();
        for mut node in candidates {
            let address = node.address();
            let probed = probe_with_retry(self.policy, &address, || self.transport.health(&node)).await;
            match probed {
                Ok(system) => {
                    node.system = system;
                    node.health = NodeHealth::Healthy;
                    reachable.push(node);
                }
                Err(e) => {
                    warn!(node = %node.id, %address, error = %e, "follower unreachable");
                    node.health = NodeHealth::Unknown;
                    unknown.push(node);
                }
            }
        }
        for node in reachable.iter().chain(&unknown) {
            self.store.put_node(node)?;
        }

        let package = self.store.sync_package(ClusterMembership {
            succession: reachable.clone(),
            unhealthy: Vec::new(),
            unknown: unknown.clone(),
            updated_at: epoch_secs(),
        })?;

        let mut succession = Vec::new();
        let mut unhealthy = Vec::new();
        for mut node in reachable {
            if let Err(e) = self.transport.push_state(&node, &package).await {
                warn!(node = %node.id, error = %e, "state push refused");
                node.health = NodeHealth::Unhealthy;
                self.store.put_node(&node)?;
                unhealthy.push(node);
                continue;
            }
            self.merge_statuses(&node).await?;
            succession.push(node);
        }

        if let Some(reconciler) = &self.reconciler {
            reconciler.tick().await;
        }

        *lists = ClusterMembership {
            succession,
            unhealthy,
            unknown,
            updated_at: epoch_secs(),
        };
        self.store.put_membership(lists)?;
        self.persist_leader_state(lists)?;
        Ok(())
    }

    /// Copy statuses the follower observed for its own applications.
    async fn merge_statuses(&self, node: &Node) -> ClusterResult<()> {
        let local = match self.transport.local_applications(node).await {
            Ok(apps) => apps,
            Err(e) => {
                debug!(node = %node.id, error = %e, "no local statuses this pass");
                return Ok(());
            }
        };
        for app in local.iter().filter(|a| a.node == node.id) {
            self.store.set_application_status(&app.id, &app.status)?;
        }
        Ok(())
    }

    fn persist_leader_state(&self, lists: &ClusterMembership) -> ClusterResult<()> {
        let leader = self
            .store
            .get_node(&self.leader.id)?
            .unwrap_or_else(|| self.leader.clone());
        let state = ClientState {
            id: leader.id.clone(),
            role: Role::Leader,
            system: leader.system.clone(),
            leader: Some(leader),
            succession: lists.succession.clone(),
            unhealthy: lists.unhealthy.clone(),
            unknown: lists.unknown.clone(),
            applications: self.store.list_applications()?,
            updated_at: lists.updated_at,
        };
        self.store.put_client_state(&state)?;
        Ok(())
    }
}

fn remove_id(lists: &mut ClusterMembership, id: &str) {
    for list in [&mut lists.succession, &mut lists.unhealthy, &mut lists.unknown] {
        list.retain(|n| n.id != id);
    }
}
