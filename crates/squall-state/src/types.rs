//! Domain types for the Squall record store.
//!
//! These are the records shared between the leader and its followers:
//! nodes, applications, routes, credentials, and the leader's membership
//! lists. All types are serializable to/from JSON for storage in redb
//! tables and for transport between daemons.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Unique identifier for a node in the cluster.
pub type NodeId = String;

/// Unique identifier for an application (UUIDv4, assigned at schedule time).
pub type ApplicationId = String;

// ── Node ──────────────────────────────────────────────────────────

/// Whether a daemon owns the schedule or just runs its share of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Leader,
    Follower,
}

/// Health classification maintained by the leader's membership tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

/// Host resources as observed by a node, with scheduling availability.
///
/// `*_allocatable` is the total minus the reserved fraction; `*_available`
/// is the allocatable amount minus everything assigned to the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub cores: u32,
    /// Host-wide CPU usage, percent.
    pub cpu_usage: f64,
    pub cpu_allocatable: f64,
    pub cpu_available: f64,
    pub total_memory: u64,
    pub free_memory: u64,
    pub memory_allocatable: u64,
    pub memory_available: u64,
    pub total_disk: u64,
    pub free_disk: u64,
}

/// A daemon taking part in the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    pub role: Role,
    #[serde(default)]
    pub health: NodeHealth,
    #[serde(default)]
    pub system: SystemInfo,
    /// Registration sequence number. Defines first-fit order.
    #[serde(default)]
    pub ordinal: u64,
    #[serde(default)]
    pub registered_at: u64,
}

impl Node {
    /// `host:port` for building peer URLs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_healthy(&self) -> bool {
        self.health == NodeHealth::Healthy
    }
}

/// Identifies a node by where it listens, as sent on deregistration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

/// The leader's classification of its followers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMembership {
    pub succession: Vec<Node>,
    pub unhealthy: Vec<Node>,
    pub unknown: Vec<Node>,
    pub updated_at: u64,
}

impl ClusterMembership {
    /// Every node across the three lists, first occurrence of each id wins.
    pub fn all_nodes(&self) -> Vec<Node> {
        let mut seen = std::collections::HashSet::new();
        self.succession
            .iter()
            .chain(&self.unhealthy)
            .chain(&self.unknown)
            .filter(|n| seen.insert(n.id.clone()))
            .cloned()
            .collect()
    }
}

/// Self-state of one daemon, served by `GET /api/state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    pub id: NodeId,
    pub role: Role,
    pub leader: Option<Node>,
    pub succession: Vec<Node>,
    pub unhealthy: Vec<Node>,
    pub unknown: Vec<Node>,
    pub applications: Vec<Application>,
    pub system: SystemInfo,
    pub updated_at: u64,
}

impl ClientState {
    /// Empty self-state for a daemon that has not observed anything yet.
    pub fn new(id: impl Into<NodeId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            leader: None,
            succession: Vec::new(),
            unhealthy: Vec::new(),
            unknown: Vec::new(),
            applications: Vec::new(),
            system: SystemInfo::default(),
            updated_at: epoch_secs(),
        }
    }
}

// ── Application ───────────────────────────────────────────────────

/// Last observed runtime status of an application's container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationStatus {
    /// CPU usage, percent of one host.
    pub cpu: f64,
    /// Memory usage, percent of the container limit.
    pub memory: f64,
    pub state: String,
}

impl Default for ApplicationStatus {
    fn default() -> Self {
        Self {
            cpu: 0.0,
            memory: 0.0,
            state: "pending".to_string(),
        }
    }
}

/// A scheduled container workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub node: NodeId,
    pub name: String,
    pub image: String,
    pub hostname: String,
    pub namespace: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Host port → container port. Keys are the exposed ports.
    #[serde(default)]
    pub ports: BTreeMap<u16, u16>,
    /// Volume name → container path.
    #[serde(default)]
    pub mounts: BTreeMap<String, String>,
    /// CPU limit in cores.
    pub cpu: f64,
    /// Memory limit in bytes.
    pub memory: u64,
    /// Bumped on restart/update so the owning node redeploys.
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub status: ApplicationStatus,
}

impl Application {
    /// Container name on the engine. Stable for the lifetime of the app.
    pub fn container_name(&self) -> String {
        format!("squall-{}", self.name)
    }

    /// Hash of everything that requires a redeploy when it changes.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.image.as_bytes());
        for (k, v) in &self.env {
            hasher.update(format!("env:{k}={v};").as_bytes());
        }
        for (host, container) in &self.ports {
            hasher.update(format!("port:{host}:{container};").as_bytes());
        }
        for (volume, path) in &self.mounts {
            hasher.update(format!("mount:{volume}:{path};").as_bytes());
        }
        hasher.update(format!("cpu:{};mem:{};rev:{}", self.cpu, self.memory, self.revision));
        hex::encode(&hasher.finalize()[..16])
    }

    /// True if any of `ports` is already exposed by this application.
    pub fn claims_any(&self, ports: &BTreeMap<u16, u16>) -> Option<u16> {
        ports.keys().copied().find(|p| self.ports.contains_key(p))
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

/// Request to schedule a new application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    pub name: String,
    pub image: String,
    pub hostname: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: BTreeMap<u16, u16>,
    #[serde(default)]
    pub mounts: BTreeMap<String, String>,
    pub cpu: f64,
    pub memory: u64,
    /// Pin to a node instead of first-fit across the cluster.
    #[serde(default)]
    pub node: Option<NodeId>,
}

/// Partial update of an existing application.
///
/// Identity and sizing fields may be repeated but not changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub node: Option<NodeId>,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub memory: Option<u64>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub ports: Option<BTreeMap<u16, u16>>,
    #[serde(default)]
    pub mounts: Option<BTreeMap<String, String>>,
}

// ── Route ─────────────────────────────────────────────────────────

/// Static alias record. Stored and served, never reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub id: String,
    pub alias: String,
    pub hostname: String,
    pub port: u16,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

// ── Credentials ───────────────────────────────────────────────────

/// An access/refresh pair issued to a daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Subject the pair was issued to.
    pub id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// What a daemon keeps for talking to its peers.
pub type ClientCredentials = TokenRecord;

impl TokenRecord {
    /// Access token validity: `issued_at <= now < expires_at`.
    pub fn is_current(&self, now: u64) -> bool {
        self.issued_at <= now && now < self.expires_at
    }
}

// ── Replication ───────────────────────────────────────────────────

/// Leader state mirrored onto followers on every membership pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPackage {
    pub membership: ClusterMembership,
    pub nodes: Vec<Node>,
    pub applications: Vec<Application>,
    pub token_records: Vec<TokenRecord>,
    pub api_tokens: Vec<String>,
    pub routes: Vec<Route>,
}

/// Seconds since the unix epoch.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
