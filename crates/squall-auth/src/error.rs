use squall_state::StateError;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Join token not outstanding (never issued or already redeemed).
    #[error("unauthorized")]
    Unauthorized,

    /// No pair holds the presented refresh token.
    #[error("refresh token not found")]
    NotFound,

    #[error("state error: {0}")]
    State(#[from] StateError),
}
