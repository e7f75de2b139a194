//! Follower agent — client-side cluster participation.
//!
//! A follower authenticates once (redeeming a join token or reusing the
//! credentials it persisted last time), registers its listen address
//! with the leader and deregisters on shutdown.

use std::sync::Arc;

use squall_state::{ClientCredentials, Node, NodeAddress, NodeHealth, Role, SystemInfo};
use tracing::info;

use crate::error::{ClusterError, ClusterResult, TransportError};
use crate::peer::PeerClient;

/// Where the leader is and where this follower listens.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Leader `host:port`.
    pub leader: String,
    /// Advertised host of this follower.
    pub host: String,
    /// Advertised port of this follower.
    pub port: u16,
}

pub struct FollowerAgent {
    config: AgentConfig,
    client: Arc<PeerClient>,
}

impl FollowerAgent {
    pub fn new(config: AgentConfig, client: Arc<PeerClient>) -> Self {
        Self { config, client }
    }

    pub fn client(&self) -> &Arc<PeerClient> {
        &self.client
    }

    /// Obtain credentials. A join token, when given, always wins over
    /// persisted credentials.
    pub async fn authenticate(&self, join_token: Option<&str>) -> ClusterResult<ClientCredentials> {
        if let Some(token) = join_token {
            return Ok(self
                .client
                .redeem_join_token(&self.config.leader, token)
                .await?);
        }
        if self.client.load_credentials().await? {
            if let Some(creds) = self.client.credentials().await {
                info!(client = %creds.id, "reusing persisted credentials");
                return Ok(creds);
            }
        }
        Err(TransportError::NoCredentials.into())
    }

    /// Register with the leader. The node id is the credential subject.
    pub async fn register(&self) -> ClusterResult<Node> {
        let creds = self
            .client
            .credentials()
            .await
            .ok_or(TransportError::NoCredentials)?;
        let node = Node {
            id: creds.id,
            host: self.config.host.clone(),
            port: self.config.port,
            role: Role::Follower,
            health: NodeHealth::Unknown,
            system: SystemInfo::default(),
            ordinal: 0,
            registered_at: 0,
        };
        let registered: Node = self
            .client
            .post_json(&self.config.leader, "/api/register", &node)
            .await?;
        info!(
            node = %registered.id,
            ordinal = registered.ordinal,
            leader = %self.config.leader,
            "joined cluster"
        );
        Ok(registered)
    }

    /// The leader's node id, as the leader lists itself.
    pub async fn leader_id(&self) -> ClusterResult<String> {
        let nodes: Vec<Node> = self
            .client
            .get_json(&self.config.leader, "/api/node")
            .await?;
        nodes
            .into_iter()
            .find(|n| n.role == Role::Leader)
            .map(|n| n.id)
            .ok_or_else(|| ClusterError::NoLeader(self.config.leader.clone()))
    }

    /// Leave the cluster gracefully.
    pub async fn leave(&self) -> ClusterResult<()> {
        let address = NodeAddress {
            host: self.config.host.clone(),
            port: self.config.port,
        };
        self.client
            .delete(&self.config.leader, "/api/register", &address)
            .await?;
        info!(leader = %self.config.leader, "left cluster");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::Renewal;
    use axum::Router;
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Seen {
        registered: Vec<Node>,
        left: Vec<NodeAddress>,
    }

    type Shared = Arc<Mutex<Seen>>;

    fn pair() -> ClientCredentials {
        ClientCredentials {
            id: "node-7".to_string(),
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            issued_at: 0,
            expires_at: u64::MAX,
        }
    }

    async fn leader() -> (String, Shared) {
        let seen: Shared = Arc::default();
        let app = Router::new()
            .route(
                "/auth/token",
                get(|headers: HeaderMap| async move {
                    let join = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    if join == "Bearer join-1" {
                        (http::StatusCode::OK, axum::Json(json!({"success": true, "data": pair()})))
                    } else {
                        (
                            http::StatusCode::UNAUTHORIZED,
                            axum::Json(json!({"success": false, "error": "unauthorized"})),
                        )
                    }
                }),
            )
            .route(
                "/api/node",
                get(|| async {
                    let leader = Node {
                        id: "leader-0".to_string(),
                        host: "10.0.0.1".to_string(),
                        port: 6626,
                        role: Role::Leader,
                        health: NodeHealth::Healthy,
                        system: SystemInfo::default(),
                        ordinal: 0,
                        registered_at: 0,
                    };
                    axum::Json(json!({"success": true, "data": [leader]}))
                }),
            )
            .route(
                "/api/register",
                post(|State(seen): State<Shared>, axum::Json(node): axum::Json<Node>| async move {
                    let stored = Node { ordinal: 3, ..node };
                    seen.lock().unwrap().registered.push(stored.clone());
                    axum::Json(json!({"success": true, "data": stored}))
                })
                .delete(
                    |State(seen): State<Shared>, axum::Json(addr): axum::Json<NodeAddress>| async move {
                        seen.lock().unwrap().left.push(addr);
                        axum::Json(json!({"success": true, "data": null}))
                    },
                ),
            )
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, seen)
    }

    fn agent(leader: &str, dir: &tempfile::TempDir) -> FollowerAgent {
        let client = PeerClient::new(Renewal::Remote {
            leader: leader.to_string(),
        })
        .with_credentials_file(dir.path().join("auth.json"));
        FollowerAgent::new(
            AgentConfig {
                leader: leader.to_string(),
                host: "10.0.0.5".to_string(),
                port: 7001,
            },
            Arc::new(client),
        )
    }

    #[tokio::test]
    async fn join_register_leave() {
        let (addr, seen) = leader().await;
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(&addr, &dir);

        let creds = agent.authenticate(Some("join-1")).await.unwrap();
        assert_eq!(creds.id, "node-7");

        assert_eq!(agent.leader_id().await.unwrap(), "leader-0");

        let node = agent.register().await.unwrap();
        assert_eq!(node.id, "node-7");
        assert_eq!(node.ordinal, 3);
        assert_eq!(seen.lock().unwrap().registered[0].host, "10.0.0.5");

        agent.leave().await.unwrap();
        assert_eq!(
            seen.lock().unwrap().left,
            vec![NodeAddress {
                host: "10.0.0.5".to_string(),
                port: 7001
            }]
        );
    }

    #[tokio::test]
    async fn restart_reuses_persisted_credentials() {
        let (addr, _) = leader().await;
        let dir = tempfile::tempdir().unwrap();
        agent(&addr, &dir).authenticate(Some("join-1")).await.unwrap();

        let restarted = agent(&addr, &dir);
        let creds = restarted.authenticate(None).await.unwrap();
        assert_eq!(creds, pair());
    }

    #[tokio::test]
    async fn bad_join_token_is_rejected() {
        let (addr, _) = leader().await;
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(&addr, &dir);

        let err = agent.authenticate(Some("wrong")).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::ClusterError::Transport(TransportError::Status { status: 401, .. })
        ));
        assert!(matches!(
            agent.authenticate(None).await,
            Err(crate::error::ClusterError::Transport(TransportError::NoCredentials))
        ));
    }
}
