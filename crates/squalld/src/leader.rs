//! Leader mode — owns the schedule, the credentials and the membership.
//!
//! In this mode, the daemon:
//! 1. Opens the record store and records itself as node 0
//! 2. Issues its own access/refresh pair for calls to followers
//! 3. Runs the membership loop, which also drives its own reconciler
//! 4. Serves the REST API until interrupted

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use squall_api::{ApiState, NodeContext, build_router};
use squall_auth::TokenAuthority;
use squall_cluster::{FollowerTransport, MembershipTracker, PeerClient, Renewal};
use squall_reconcile::{ContainerEngine, Reconciler, ReconcilerConfig, SystemProbe, system_info};
use squall_state::{ClientState, Node, NodeAddress, NodeHealth, Role, StateStore};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::DaemonConfig;

pub struct LeaderDaemon {
    state: ApiState,
    tracker: Arc<MembershipTracker>,
    reconciler: Arc<Reconciler>,
    config: DaemonConfig,
}

impl LeaderDaemon {
    /// Open the on-disk store under `data_dir` and assemble the leader.
    pub async fn bootstrap(
        config: DaemonConfig,
        engine: Arc<dyn ContainerEngine>,
        probe: Arc<dyn SystemProbe>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db_path = config.db_path();
        let store = StateStore::open(&db_path)?;
        info!(path = ?db_path, "state store opened");
        Self::with_store(config, store, engine, probe).await
    }

    pub async fn with_store(
        config: DaemonConfig,
        store: StateStore,
        engine: Arc<dyn ContainerEngine>,
        probe: Arc<dyn SystemProbe>,
    ) -> anyhow::Result<Self> {
        // A restarted leader keeps its identity.
        let id = store
            .list_nodes()?
            .into_iter()
            .find(|n| n.role == Role::Leader)
            .map(|n| n.id)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let snapshot = probe.snapshot().await;
        let system = system_info(
            &snapshot,
            config.reservation(),
            &store.list_applications_for_node(&id)?,
        );
        let me = Node {
            id: id.clone(),
            host: config.host.clone(),
            port: config.port,
            role: Role::Leader,
            health: NodeHealth::Healthy,
            system,
            ordinal: 0,
            registered_at: 0,
        };

        let authority = TokenAuthority::with_ttl(store.clone(), config.token_ttl_secs);
        let peer = Arc::new(PeerClient::new(Renewal::Local(authority.clone())));
        peer.set_credentials(authority.issue_credentials(&id)?).await?;

        if store.get_client_state(&id)?.is_none() {
            store.put_client_state(&ClientState::new(id.clone(), Role::Leader))?;
        }

        let reconciler = Arc::new(Reconciler::new(
            ReconcilerConfig {
                node_id: id.clone(),
                volume_root: config.volume_root(),
                reservation: config.reservation(),
                infrastructure: config.infrastructure_containers.clone(),
            },
            store.clone(),
            engine.clone(),
            probe,
        ));
        let transport: Arc<dyn FollowerTransport> = peer.clone();
        let tracker = Arc::new(
            MembershipTracker::new(store.clone(), me, transport)?
                .with_reconciler(reconciler.clone())
                .with_policy(config.probe_policy()),
        );

        let context = NodeContext {
            id: id.clone(),
            role: Role::Leader,
            advertise: NodeAddress {
                host: config.host.clone(),
                port: config.port,
            },
            leader: None,
            leader_id: Some(id.clone()),
        };
        let state = ApiState::new(context, store, engine, peer)
            .with_authority(authority)
            .with_tracker(tracker.clone())
            .with_allowed_ips(config.allowed_ips.clone());

        info!(node = %id, host = %config.host, port = config.port, "leader ready");
        Ok(Self {
            state,
            tracker,
            reconciler,
            config,
        })
    }

    pub fn id(&self) -> &str {
        &self.state.node.id
    }

    pub fn authority(&self) -> &TokenAuthority {
        &self.state.authority
    }

    pub fn tracker(&self) -> &Arc<MembershipTracker> {
        &self.tracker
    }

    pub fn api_state(&self) -> &ApiState {
        &self.state
    }

    /// Start the loops and serve on `listener` until `shutdown` resolves.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        tokio::spawn(
            self.tracker
                .clone()
                .run(self.config.health_check_interval()),
        );
        tokio::spawn(
            self.reconciler
                .clone()
                .run(self.config.reconcile_interval()),
        );

        let router = build_router(self.state);
        info!(addr = %listener.local_addr()?, "API server starting");
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("leader stopped");
        Ok(())
    }
}
