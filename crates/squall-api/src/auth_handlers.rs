//! Credential endpoints under `/auth`.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Serialize;
use squall_auth::join_command;
use squall_state::ClientCredentials;

use crate::error::{ApiError, ApiResult};
use crate::middleware::{api_token, bearer_token, verify_access};
use crate::response::ApiResponse;
use crate::state::ApiState;

type Reply<T> = ApiResult<Json<ApiResponse<T>>>;

const DAEMON_BINARY: &str = "squalld";

/// A fresh join token with the command that redeems it.
#[derive(Debug, Serialize)]
pub struct JoinTicket {
    pub token: String,
    pub command: String,
}

fn presented_bearer(headers: &HeaderMap) -> ApiResult<&str> {
    bearer_token(headers).ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))
}

/// GET /auth/join (local only)
pub async fn issue_join_token(State(state): State<ApiState>) -> Reply<JoinTicket> {
    let token = state.authority.issue_join_token()?;
    let advertise = &state.node.advertise;
    let command = join_command(DAEMON_BINARY, &advertise.host, advertise.port, &token);
    Ok(ApiResponse::ok(JoinTicket { token, command }))
}

/// GET /auth/token with `Bearer <join token>`
pub async fn redeem_join_token(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Reply<ClientCredentials> {
    let join = presented_bearer(&headers)?;
    Ok(ApiResponse::ok(state.authority.redeem_join_token(join)?))
}

/// GET /auth/refresh with `Bearer <refresh token>`
pub async fn refresh_token(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Reply<ClientCredentials> {
    let refresh = presented_bearer(&headers)?;
    Ok(ApiResponse::ok(state.authority.refresh(refresh)?))
}

/// GET /auth/check with `Bearer <access token>`
///
/// The answer is in the status code: 200, 406 or 401. A `200` carries
/// the subject the token was issued to.
pub async fn check_token(State(state): State<ApiState>, headers: HeaderMap) -> Reply<String> {
    let access = presented_bearer(&headers)?.to_string();
    let subject = verify_access(&state, &access).await?;
    Ok(ApiResponse::ok(subject))
}

/// GET /auth/api (local only)
pub async fn issue_api_token(State(state): State<ApiState>) -> Reply<String> {
    Ok(ApiResponse::ok(state.authority.issue_api_token()?))
}

/// DELETE /auth/api with `X-Squall-API: <token>`
pub async fn revoke_api_token(State(state): State<ApiState>, headers: HeaderMap) -> Reply<&'static str> {
    let token = api_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("missing api token".to_string()))?;
    state.authority.revoke_api_token(token)?;
    Ok(ApiResponse::ok("revoked"))
}
