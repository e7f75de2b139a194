//! Follower mode — runs its share of the schedule.
//!
//! In this mode, the daemon:
//! 1. Opens its replica of the record store
//! 2. Redeems a join token (or reuses persisted credentials) and learns
//!    the leader's node id
//! 3. Starts the REST API and its reconciler
//! 4. Registers with the leader, which starts pushing state
//! 5. On shutdown, deregisters before the API stops

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use squall_api::{ApiState, NodeContext, build_router};
use squall_auth::TokenAuthority;
use squall_cluster::{AgentConfig, FollowerAgent, PeerClient, Renewal};
use squall_reconcile::{ContainerEngine, Reconciler, ReconcilerConfig, SystemProbe};
use squall_state::{ClientState, Node, NodeAddress, Role, StateStore};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::DaemonConfig;

pub struct FollowerDaemon {
    state: ApiState,
    agent: FollowerAgent,
    reconciler: Arc<Reconciler>,
    config: DaemonConfig,
}

impl FollowerDaemon {
    pub async fn bootstrap(
        config: DaemonConfig,
        leader: String,
        join_token: Option<String>,
        engine: Arc<dyn ContainerEngine>,
        probe: Arc<dyn SystemProbe>,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db_path = config.db_path();
        let store = StateStore::open(&db_path)?;
        info!(path = ?db_path, "replica store opened");
        Self::with_store(config, store, leader, join_token, engine, probe).await
    }

    pub async fn with_store(
        config: DaemonConfig,
        store: StateStore,
        leader: String,
        join_token: Option<String>,
        engine: Arc<dyn ContainerEngine>,
        probe: Arc<dyn SystemProbe>,
    ) -> anyhow::Result<Self> {
        let peer = Arc::new(
            PeerClient::new(Renewal::Remote {
                leader: leader.clone(),
            })
            .with_credentials_file(config.credentials_path()),
        );
        let agent = FollowerAgent::new(
            AgentConfig {
                leader: leader.clone(),
                host: config.host.clone(),
                port: config.port,
            },
            peer.clone(),
        );
        let id = agent.authenticate(join_token.as_deref()).await?.id;
        let leader_id = agent.leader_id().await?;

        if store.get_client_state(&id)?.is_none() {
            store.put_client_state(&ClientState::new(id.clone(), Role::Follower))?;
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

        let context = NodeContext {
            id: id.clone(),
            role: Role::Follower,
            advertise: NodeAddress {
                host: config.host.clone(),
                port: config.port,
            },
            leader: Some(leader.clone()),
            leader_id: Some(leader_id.clone()),
        };
        let state = ApiState::new(context, store.clone(), engine, peer)
            .with_authority(TokenAuthority::with_ttl(store, config.token_ttl_secs))
            .with_allowed_ips(config.allowed_ips.clone());

        info!(node = %id, %leader, %leader_id, "follower ready");
        Ok(Self {
            state,
            agent,
            reconciler,
            config,
        })
    }

    pub fn id(&self) -> &str {
        &self.state.node.id
    }

    /// Serve on `listener`, register, and leave once `shutdown` resolves.
    ///
    /// `registered` receives the leader's record of this node.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send,
        registered: Option<oneshot::Sender<Node>>,
    ) -> anyhow::Result<()> {
        tokio::spawn(
            self.reconciler
                .clone()
                .run(self.config.reconcile_interval()),
        );

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let router = build_router(self.state);
        info!(addr = %listener.local_addr()?, "API server starting");
        let server = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
        });

        // The leader probes this node while registering, so the API is up first.
        let node = match self.agent.register().await {
            Ok(node) => node,
            Err(e) => {
                let _ = stop_tx.send(());
                let _ = server.await;
                return Err(e.into());
            }
        };
        if let Some(tx) = registered {
            let _ = tx.send(node);
        }

        shutdown.await;
        if let Err(e) = self.agent.leave().await {
            warn!(error = %e, "could not deregister from leader");
        }
        let _ = stop_tx.send(());
        server.await??;

        info!("follower stopped");
        Ok(())
    }
}
