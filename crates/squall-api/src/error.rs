//! The error taxonomy every handler answers with.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use squall_auth::AuthError;
use squall_cluster::{ClusterError, TransportError};
use squall_dns::ResolveError;
use squall_placement::SchedulerError;
use squall_reconcile::EngineError;
use squall_state::StateError;
use thiserror::Error;

use crate::response::ApiResponse;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The token is known but expired; refresh and retry.
    #[error("not acceptable: {0}")]
    NotAcceptable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("insufficient resources: {0}")]
    InsufficientResources(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A peer daemon or the container engine failed.
    #[error("upstream: {0}")]
    Upstream(String),

    #[error("state: {0}")]
    State(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InsufficientResources(_) => StatusCode::INSUFFICIENT_STORAGE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "request failed");
        }
        (status, Json(ApiResponse::<()>::failure(self.to_string()))).into_response()
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::PortClaimed { .. } | StateError::AliasClaimed { .. } => {
                Self::Conflict(e.to_string())
            }
            other => Self::State(other.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Conflict(msg) => Self::Conflict(msg),
            SchedulerError::InsufficientResources { .. } => Self::InsufficientResources(e.to_string()),
            SchedulerError::NotFound(what) => Self::NotFound(what),
            SchedulerError::Invalid(msg) => Self::Invalid(msg),
            SchedulerError::State(inner) => inner.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unauthorized => Self::Unauthorized("token not accepted".to_string()),
            AuthError::NotFound => Self::NotFound("refresh token".to_string()),
            AuthError::State(inner) => inner.into(),
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound(fqdn) => Self::NotFound(fqdn),
            ResolveError::Unavailable { .. } => Self::Unavailable(e.to_string()),
            ResolveError::State(inner) => inner.into(),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(e: TransportError) -> Self {
        match e.status() {
            Some(404) => Self::NotFound(e.to_string()),
            Some(503) => Self::Unavailable(e.to_string()),
            _ => Self::Upstream(e.to_string()),
        }
    }
}

impl From<ClusterError> for ApiError {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::UnknownNode { .. } => Self::NotFound(e.to_string()),
            ClusterError::LeaderIdentity(_) => Self::Conflict(e.to_string()),
            ClusterError::NoLeader(_) => Self::Upstream(e.to_string()),
            ClusterError::State(inner) => inner.into(),
            ClusterError::Transport(inner) => inner.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Upstream(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (ApiError::Unauthorized(String::new()), 401),
            (ApiError::NotAcceptable(String::new()), 406),
            (ApiError::Conflict(String::new()), 409),
            (ApiError::InsufficientResources(String::new()), 507),
            (ApiError::NotFound(String::new()), 404),
            (ApiError::Unavailable(String::new()), 503),
            (ApiError::Upstream(String::new()), 502),
            (ApiError::State(String::new()), 500),
            (ApiError::Invalid(String::new()), 400),
        ];
        for (error, code) in cases {
            assert_eq!(error.status().as_u16(), code, "{error}");
        }
    }

    #[test]
    fn scheduler_errors_keep_their_meaning() {
        let err: ApiError = SchedulerError::InsufficientResources { cpu: 2.0, memory: 1 }.into();
        assert_eq!(err.status(), StatusCode::INSUFFICIENT_STORAGE);

        let err: ApiError = SchedulerError::State(StateError::PortClaimed {
            port: 80,
            owner: "a1".to_string(),
        })
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn taken_alias_is_conflict() {
        let err: ApiError = StateError::AliasClaimed {
            alias: "www".to_string(),
            namespace: "edge".to_string(),
            owner: "r1".to_string(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn refresh_miss_is_not_found() {
        let err: ApiError = AuthError::NotFound.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn peer_status_passes_through() {
        let err: ApiError = TransportError::Status {
            address: "10.0.0.2:7000".to_string(),
            status: 404,
            message: "gone".to_string(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err: ApiError = TransportError::Timeout {
            address: "10.0.0.2:7000".to_string(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
