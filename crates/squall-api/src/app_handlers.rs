//! Application handlers.
//!
//! Scheduling and lifecycle edits go through the [`ResourceScheduler`];
//! nothing here touches containers except the `local` log route, which
//! reads from this node's own engine.
//!
//! [`ResourceScheduler`]: squall_placement::ResourceScheduler

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use squall_state::{Application, ApplicationPatch, ApplicationSpec};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::response::ApiResponse;
use crate::state::ApiState;

type Reply<T> = ApiResult<Json<ApiResponse<T>>>;

fn find(state: &ApiState, id: &str) -> ApiResult<Application> {
    state
        .store
        .get_application(id)?
        .ok_or_else(|| ApiError::NotFound(format!("application {id}")))
}

/// GET /api/application
pub async fn list_applications(State(state): State<ApiState>) -> Reply<Vec<Application>> {
    Ok(ApiResponse::ok(state.store.list_applications()?))
}

/// POST /api/application
pub async fn create_application(
    State(state): State<ApiState>,
    Json(spec): Json<ApplicationSpec>,
) -> ApiResult<impl IntoResponse> {
    let app = state.scheduler.schedule(&spec, spec.node.as_deref()).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(app)))
}

/// GET /api/application/{id}
pub async fn get_application(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Reply<Application> {
    Ok(ApiResponse::ok(find(&state, &id)?))
}

/// PUT /api/application/{id}
pub async fn update_application(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(patch): Json<ApplicationPatch>,
) -> Reply<Application> {
    Ok(ApiResponse::ok(state.scheduler.update(&id, &patch).await?))
}

/// DELETE /api/application/{id}
pub async fn delete_application(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Reply<Application> {
    Ok(ApiResponse::ok(state.scheduler.delete(&id).await?))
}

/// GET /api/application/{id}/restart
pub async fn restart_application(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Reply<Application> {
    Ok(ApiResponse::ok(state.scheduler.restart(&id).await?))
}

/// GET /api/application/{id}/logs
///
/// Served from the local engine when this node runs the application,
/// otherwise fetched from the owning node.
pub async fn application_logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Reply<String> {
    let app = find(&state, &id)?;
    if app.node == state.node.id {
        return Ok(ApiResponse::ok(state.engine.logs(&app.container_name()).await?));
    }

    let owner = state
        .store
        .get_node(&app.node)?
        .ok_or_else(|| ApiError::NotFound(format!("node {}", app.node)))?;
    debug!(%id, owner = %owner.id, "proxying log request");
    let logs: String = state
        .peer
        .get_json(&owner.address(), &format!("/api/application/{id}/logs/local"))
        .await?;
    Ok(ApiResponse::ok(logs))
}

/// GET /api/application/local
pub async fn local_applications(State(state): State<ApiState>) -> Reply<Vec<Application>> {
    Ok(ApiResponse::ok(
        state.store.list_applications_for_node(&state.node.id)?,
    ))
}

/// GET /api/application/{id}/logs/local
pub async fn local_logs(State(state): State<ApiState>, Path(id): Path<String>) -> Reply<String> {
    let app = find(&state, &id)?;
    if app.node != state.node.id {
        return Err(ApiError::NotFound(format!(
            "application {id} does not run on {}",
            state.node.id
        )));
    }
    Ok(ApiResponse::ok(state.engine.logs(&app.container_name()).await?))
}
