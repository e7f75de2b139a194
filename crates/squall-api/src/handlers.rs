//! Node-level handlers: health, self-state, membership, node listing.

use axum::Json;
use axum::extract::{Extension, State};
use squall_state::{ClientState, Node, NodeAddress, Role, SyncPackage, SystemInfo, epoch_secs};
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::middleware::Principal;
use crate::response::ApiResponse;
use crate::state::ApiState;

type Reply<T> = ApiResult<Json<ApiResponse<T>>>;

/// Daemon-to-daemon routes refuse operator API tokens. Yields the
/// calling daemon's node id.
fn require_bearer(principal: Principal) -> ApiResult<String> {
    match principal {
        Principal::Bearer { subject } => Ok(subject),
        Principal::Api => Err(ApiError::Unauthorized(
            "daemon credentials required".to_string(),
        )),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /api/health
///
/// Unhealthy when the container engine cannot be reached.
pub async fn health(State(state): State<ApiState>) -> Reply<SystemInfo> {
    if let Err(e) = state.engine.list().await {
        return Err(ApiError::Unavailable(format!("container engine: {e}")));
    }
    let system = state
        .store
        .get_node(&state.node.id)?
        .map(|node| node.system)
        .unwrap_or_default();
    Ok(ApiResponse::ok(system))
}

// ── Self-state ─────────────────────────────────────────────────

/// GET /api/state
pub async fn get_state(State(state): State<ApiState>) -> Reply<ClientState> {
    let client = state
        .store
        .get_client_state(&state.node.id)?
        .ok_or_else(|| ApiError::NotFound(format!("state of {}", state.node.id)))?;
    Ok(ApiResponse::ok(client))
}

/// POST /api/state
///
/// A follower mirrors what the leader pushed and refreshes its own view
/// of the membership.
pub async fn apply_state(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Json(package): Json<SyncPackage>,
) -> Reply<&'static str> {
    let sender = require_bearer(principal)?;
    if state.node.is_leader() {
        return Err(ApiError::Invalid("the leader does not accept state".to_string()));
    }
    if state.node.leader_id.as_deref() != Some(sender.as_str()) {
        warn!(%sender, "state push from a non-leader refused");
        return Err(ApiError::Unauthorized(
            "state is accepted from the leader only".to_string(),
        ));
    }

    state.store.apply_sync(&package, &state.node.id)?;

    let mut client = state
        .store
        .get_client_state(&state.node.id)?
        .unwrap_or_else(|| ClientState::new(state.node.id.clone(), Role::Follower));
    client.leader = package
        .nodes
        .iter()
        .find(|n| n.role == Role::Leader)
        .cloned();
    client.succession = package.membership.succession.clone();
    client.unhealthy = package.membership.unhealthy.clone();
    client.unknown = package.membership.unknown.clone();
    client.applications = state.store.list_applications_for_node(&state.node.id)?;
    client.updated_at = epoch_secs();
    state.store.put_client_state(&client)?;

    debug!(
        applications = package.applications.len(),
        nodes = package.nodes.len(),
        "leader state applied"
    );
    Ok(ApiResponse::ok("applied"))
}

// ── Membership ─────────────────────────────────────────────────

/// POST /api/register
pub async fn register(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Json(node): Json<Node>,
) -> Reply<Node> {
    let caller = require_bearer(principal)?;
    if node.id != caller {
        warn!(%caller, claimed = %node.id, "registration under another node's id refused");
        return Err(ApiError::Unauthorized(format!(
            "credentials belong to {caller}, not {}",
            node.id
        )));
    }
    let tracker = state
        .tracker
        .as_ref()
        .ok_or_else(|| ApiError::Invalid("only the leader tracks membership".to_string()))?;
    let stored = tracker.register_follower(node).await?;
    info!(node = %stored.id, address = %stored.address(), "registration accepted");
    Ok(ApiResponse::ok(stored))
}

/// DELETE /api/register
pub async fn deregister(
    State(state): State<ApiState>,
    Extension(principal): Extension<Principal>,
    Json(address): Json<NodeAddress>,
) -> Reply<Node> {
    let caller = require_bearer(principal)?;
    let tracker = state
        .tracker
        .as_ref()
        .ok_or_else(|| ApiError::Invalid("only the leader tracks membership".to_string()))?;
    let owner = tracker
        .membership()
        .await
        .all_nodes()
        .into_iter()
        .find(|n| n.host == address.host && n.port == address.port);
    if let Some(owner) = owner {
        if owner.id != caller {
            return Err(ApiError::Unauthorized(format!(
                "{}:{} is registered to another node",
                address.host, address.port
            )));
        }
    }
    let removed = tracker
        .deregister_follower(&address.host, address.port)
        .await?;
    Ok(ApiResponse::ok(removed))
}

// ── Nodes ──────────────────────────────────────────────────────

/// GET /api/node
pub async fn list_nodes(State(state): State<ApiState>) -> Reply<Vec<Node>> {
    Ok(ApiResponse::ok(state.store.list_nodes()?))
}
