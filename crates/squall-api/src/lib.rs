//! squall-api — REST API for Squall.
//!
//! Every daemon serves the same router. Routes that change the schedule
//! or mint credentials belong to the leader; on a follower they answer
//! `307 Temporary Redirect` to the same path on the leader.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/health` | Resource figures; `503` if the engine is unreachable |
//! | GET, POST | `/api/state` | Self-state / apply a leader push |
//! | POST, DELETE | `/api/register` | Follower join / leave |
//! | GET | `/api/node` | Nodes with role and health |
//! | GET, POST | `/api/application` | List / schedule |
//! | GET, PUT, DELETE | `/api/application/{id}` | Get / update / delete |
//! | GET | `/api/application/{id}/logs` | Container logs, from the owning node |
//! | GET | `/api/application/{id}/restart` | Restart |
//! | GET | `/api/application/local` | Applications assigned to this node |
//! | GET | `/api/application/{id}/logs/local` | Logs from this node's engine |
//! | GET, POST | `/api/route` | List / create aliases |
//! | GET, DELETE | `/api/route/{id}` | Get / delete an alias |
//! | GET | `/api/namespace` | Namespaces in use |
//! | GET | `/api/resolve/{fqdn}` | Host of the node serving a name |
//! | GET | `/auth/join` | Mint a join token (local only) |
//! | GET | `/auth/token` | Redeem a join token |
//! | GET | `/auth/refresh` | Rotate an access/refresh pair |
//! | GET | `/auth/check` | Classify an access token |
//! | GET, DELETE | `/auth/api` | Mint (local only) / revoke an API token |

pub mod app_handlers;
pub mod auth_handlers;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod route_handlers;
pub mod state;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};

pub use error::{ApiError, ApiResult};
pub use response::ApiResponse;
pub use state::{ApiState, NodeContext};

use crate::middleware::{leader_redirect, local_only, require_token};

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let authenticated = from_fn_with_state(state.clone(), require_token);
    let leader_only = from_fn_with_state(state.clone(), leader_redirect);
    let local = from_fn_with_state(state.clone(), local_only);

    let cluster_routes = Router::new()
        .route("/api/register", post(handlers::register).delete(handlers::deregister))
        .route(
            "/api/application",
            get(app_handlers::list_applications).post(app_handlers::create_application),
        )
        .route(
            "/api/application/{id}",
            get(app_handlers::get_application)
                .put(app_handlers::update_application)
                .delete(app_handlers::delete_application),
        )
        .route("/api/application/{id}/logs", get(app_handlers::application_logs))
        .route("/api/application/{id}/restart", get(app_handlers::restart_application))
        .route(
            "/api/route",
            get(route_handlers::list_routes).post(route_handlers::create_route),
        )
        .route(
            "/api/route/{id}",
            get(route_handlers::get_route).delete(route_handlers::delete_route),
        )
        .route("/api/namespace", get(route_handlers::list_namespaces))
        .route_layer(authenticated.clone())
        .route_layer(leader_only.clone());

    let credential_routes = Router::new()
        .route(
            "/auth/join",
            get(auth_handlers::issue_join_token).route_layer(local.clone()),
        )
        .route(
            "/auth/api",
            get(auth_handlers::issue_api_token)
                .route_layer(local)
                .delete(auth_handlers::revoke_api_token),
        )
        .route("/auth/token", get(auth_handlers::redeem_join_token))
        .route("/auth/refresh", get(auth_handlers::refresh_token))
        .route_layer(leader_only);

    let node_routes = Router::new()
        .route("/api/state", get(handlers::get_state).post(handlers::apply_state))
        .route("/api/node", get(handlers::list_nodes))
        .route("/api/application/local", get(app_handlers::local_applications))
        .route("/api/application/{id}/logs/local", get(app_handlers::local_logs))
        .route_layer(authenticated);

    let public_routes = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/resolve/{fqdn}", get(route_handlers::resolve))
        .route("/auth/check", get(auth_handlers::check_token));

    Router::new()
        .merge(cluster_routes)
        .merge(credential_routes)
        .merge(node_routes)
        .merge(public_routes)
        .with_state(state)
}
