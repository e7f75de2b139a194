//! squall-auth — the cluster's token authority.
//!
//! Four kinds of credential exist:
//!
//! - **join tokens**, single-use, minted on the leader and redeemed by a
//!   joining follower for its first access/refresh pair;
//! - **access tokens**, sent as `Authorization: Bearer …`, valid for a
//!   fixed window (six hours unless configured otherwise);
//! - **refresh tokens**, exchanged for a new pair when the access token
//!   expires;
//! - **API tokens**, long-lived CLI credentials sent as `X-Squall-API`.
//!
//! All of them live in the [`StateStore`](squall_state::StateStore), so the
//! leader's credentials replicate to followers with the rest of its state.

pub mod authority;
pub mod error;
pub mod token;

pub use authority::{DEFAULT_TOKEN_TTL_SECS, TokenAuthority, TokenStatus, join_command};
pub use error::{AuthError, AuthResult};
pub use token::{TOKEN_LENGTH, random_token};
