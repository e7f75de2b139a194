//! Route aliases, namespaces and name resolution.

use std::collections::BTreeSet;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use squall_state::Route;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::response::ApiResponse;
use crate::state::ApiState;

type Reply<T> = ApiResult<Json<ApiResponse<T>>>;

/// GET /api/route
pub async fn list_routes(State(state): State<ApiState>) -> Reply<Vec<Route>> {
    Ok(ApiResponse::ok(state.store.list_routes()?))
}

/// POST /api/route
///
/// An alias is unique within its namespace, ignoring case.
pub async fn create_route(
    State(state): State<ApiState>,
    Json(mut route): Json<Route>,
) -> ApiResult<impl IntoResponse> {
    if route.alias.trim().is_empty() || route.hostname.trim().is_empty() {
        return Err(ApiError::Invalid("alias and hostname are required".to_string()));
    }
    if route.id.is_empty() {
        route.id = uuid::Uuid::new_v4().to_string();
    }
    state.store.put_route_checked(&route)?;
    info!(id = %route.id, alias = %route.alias, hostname = %route.hostname, "route created");
    Ok((StatusCode::CREATED, ApiResponse::ok(route)))
}

/// GET /api/route/{id}
pub async fn get_route(State(state): State<ApiState>, Path(id): Path<String>) -> Reply<Route> {
    let route = state
        .store
        .get_route(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("route {id}")))?;
    Ok(ApiResponse::ok(route))
}

/// DELETE /api/route/{id}
pub async fn delete_route(State(state): State<ApiState>, Path(id): Path<String>) -> Reply<&'static str> {
    if state.store.delete_route(&id)? {
        Ok(ApiResponse::ok("deleted"))
    } else {
        Err(ApiError::NotFound(format!("route {id}")))
    }
}

/// GET /api/namespace
pub async fn list_namespaces(State(state): State<ApiState>) -> Reply<Vec<String>> {
    let mut namespaces: BTreeSet<String> = state
        .store
        .list_applications()?
        .into_iter()
        .map(|app| app.namespace)
        .collect();
    namespaces.extend(state.store.list_routes()?.into_iter().map(|r| r.namespace));
    Ok(ApiResponse::ok(namespaces.into_iter().collect()))
}

/// GET /api/resolve/{fqdn}
pub async fn resolve(State(state): State<ApiState>, Path(fqdn): Path<String>) -> Reply<String> {
    Ok(ApiResponse::ok(state.resolver.resolve(&fqdn)?))
}
