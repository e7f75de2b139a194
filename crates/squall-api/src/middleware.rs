//! Request guards: token authentication, local-only sources, and the
//! follower → leader redirect.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use squall_auth::TokenStatus;
use squall_cluster::API_TOKEN_HEADER;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

/// How a request authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// A daemon's access token, issued to `subject`.
    Bearer { subject: String },
    /// An operator's API token.
    Api,
}

/// `Authorization: Bearer <token>`, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

pub fn api_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

/// Classify an access token, asking the leader about tokens this
/// replica has not seen yet. Yields the subject the token was issued to.
pub async fn verify_access(state: &ApiState, token: &str) -> ApiResult<String> {
    match state.authority.identify_access(token)? {
        (TokenStatus::Ok, Some(subject)) => return Ok(subject),
        (TokenStatus::NotAcceptable, _) => {
            return Err(ApiError::NotAcceptable("access token expired".to_string()));
        }
        _ => {}
    }

    let Some(leader) = state.node.leader.as_deref() else {
        return Err(ApiError::Unauthorized("unknown access token".to_string()));
    };
    let (status, subject) = state.peer.check_token(leader, token).await?;
    debug!(%leader, %status, "access token checked with leader");
    match (status, subject) {
        (StatusCode::OK, Some(subject)) => Ok(subject),
        (StatusCode::NOT_ACCEPTABLE, _) => {
            Err(ApiError::NotAcceptable("access token expired".to_string()))
        }
        _ => Err(ApiError::Unauthorized("unknown access token".to_string())),
    }
}

/// Require a valid API token or bearer access token.
pub async fn require_token(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Response {
    let api = api_token(request.headers()).map(str::to_string);
    let bearer = bearer_token(request.headers()).map(str::to_string);

    let principal = if let Some(token) = api {
        match state.authority.check_api_token(&token) {
            Ok(TokenStatus::Ok) => Ok(Principal::Api),
            Ok(_) => Err(ApiError::Unauthorized("unknown api token".to_string())),
            Err(e) => Err(e.into()),
        }
    } else if let Some(token) = bearer {
        verify_access(&state, &token)
            .await
            .map(|subject| Principal::Bearer { subject })
    } else {
        Err(ApiError::Unauthorized("missing credentials".to_string()))
    };

    match principal {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Accept only requests whose source address is in `allowed_ips`.
pub async fn local_only(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let source = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    match source {
        Some(ip) if state.allowed_ips.contains(&ip) => next.run(request).await,
        other => {
            debug!(source = ?other, path = %request.uri().path(), "non-local request refused");
            ApiError::Unauthorized("local requests only".to_string()).into_response()
        }
    }
}

/// On a follower, send the caller to the same path on the leader.
pub async fn leader_redirect(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    match state.node.leader.as_deref() {
        Some(leader) if !state.node.is_leader() => {
            let path = request
                .uri()
                .path_and_query()
                .map(|p| p.as_str())
                .unwrap_or("/");
            Redirect::temporary(&format!("http://{leader}{path}")).into_response()
        }
        _ => next.run(request).await,
    }
}
