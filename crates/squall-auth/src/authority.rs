//! TokenAuthority — issues, validates and rotates credentials.

use squall_state::{ClientCredentials, StateStore, TokenRecord, epoch_secs};
use tracing::{debug, info};

use crate::error::{AuthError, AuthResult};
use crate::token::random_token;

/// Access tokens are valid for six hours after issue.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 6 * 60 * 60;

/// Outcome of validating a presented token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Ok,
    /// Known but outside its validity window; refresh and retry.
    NotAcceptable,
    Unauthorized,
}

/// Credential lifecycle over the shared record store.
#[derive(Clone)]
pub struct TokenAuthority {
    store: StateStore,
    ttl_secs: u64,
}

impl TokenAuthority {
    pub fn new(store: StateStore) -> Self {
        Self::with_ttl(store, DEFAULT_TOKEN_TTL_SECS)
    }

    pub fn with_ttl(store: StateStore, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    fn fresh_pair(&self, subject: &str) -> TokenRecord {
        let now = epoch_secs();
        TokenRecord {
            id: subject.to_string(),
            access_token: random_token(),
            refresh_token: random_token(),
            issued_at: now,
            expires_at: now + self.ttl_secs,
        }
    }

    // ── Join tokens ───────────────────────────────────────────────

    /// Mint a single-use join token.
    pub fn issue_join_token(&self) -> AuthResult<String> {
        let token = random_token();
        self.store.insert_join_token(&token)?;
        info!("join token issued");
        Ok(token)
    }

    /// Exchange a join token for a new access/refresh pair.
    ///
    /// Exactly one of any number of concurrent redemptions of the same
    /// token succeeds; the rest see `Unauthorized`.
    pub fn redeem_join_token(&self, token: &str) -> AuthResult<ClientCredentials> {
        let subject = uuid::Uuid::new_v4().to_string();
        let issued = self
            .store
            .redeem_join_token(token, || self.fresh_pair(&subject))?
            .ok_or(AuthError::Unauthorized)?;
        info!(client = %issued.id, "join token redeemed");
        Ok(issued)
    }

    /// Issue (or replace) the pair for a known subject, e.g. the leader's own.
    pub fn issue_credentials(&self, subject: &str) -> AuthResult<ClientCredentials> {
        let record = self.fresh_pair(subject);
        self.store.put_token_record(&record)?;
        debug!(%subject, "credentials issued");
        Ok(record)
    }

    // ── Access / refresh ──────────────────────────────────────────

    pub fn check_access(&self, token: &str) -> AuthResult<TokenStatus> {
        Ok(self.identify_access(token)?.0)
    }

    /// Classify an access token and, when it is current, name the
    /// subject it was issued to.
    pub fn identify_access(&self, token: &str) -> AuthResult<(TokenStatus, Option<String>)> {
        if token.is_empty() {
            return Ok((TokenStatus::Unauthorized, None));
        }
        let identified = match self.store.find_token_by_access(token)? {
            Some(record) if record.is_current(epoch_secs()) => (TokenStatus::Ok, Some(record.id)),
            Some(_) => (TokenStatus::NotAcceptable, None),
            None => (TokenStatus::Unauthorized, None),
        };
        Ok(identified)
    }

    /// Rotate both tokens of the pair holding `refresh_token`.
    ///
    /// The old access and refresh tokens stop working immediately. Of
    /// concurrent refreshes with the same token only one succeeds.
    pub fn refresh(&self, refresh_token: &str) -> AuthResult<ClientCredentials> {
        if refresh_token.is_empty() {
            return Err(AuthError::NotFound);
        }
        let rotated = self
            .store
            .rotate_token_record(refresh_token, |old| self.fresh_pair(&old.id))?
            .ok_or(AuthError::NotFound)?;
        debug!(client = %rotated.id, "token pair rotated");
        Ok(rotated)
    }

    // ── API tokens ────────────────────────────────────────────────

    pub fn issue_api_token(&self) -> AuthResult<String> {
        let token = random_token();
        self.store.insert_api_token(&token)?;
        info!("api token issued");
        Ok(token)
    }

    /// Revoke an API token. Revoking an unknown token is `Unauthorized`.
    pub fn revoke_api_token(&self, token: &str) -> AuthResult<()> {
        if self.store.remove_api_token(token)? {
            info!("api token revoked");
            Ok(())
        } else {
            Err(AuthError::Unauthorized)
        }
    }

    pub fn check_api_token(&self, token: &str) -> AuthResult<TokenStatus> {
        if !token.is_empty() && self.store.has_api_token(token)? {
            Ok(TokenStatus::Ok)
        } else {
            Ok(TokenStatus::Unauthorized)
        }
    }
}

/// The command an operator runs on a new machine to join the cluster.
pub fn join_command(binary: &str, leader_host: &str, leader_port: u16, token: &str) -> String {
    format!("{binary} follower --leader {leader_host}:{leader_port} --join-token {token}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Barrier;

    fn authority() -> TokenAuthority {
        TokenAuthority::new(StateStore::open_in_memory().unwrap())
    }

    #[test]
    fn redeemed_pair_is_valid_for_six_hours() {
        let auth = authority();
        let join = auth.issue_join_token().unwrap();
        let creds = auth.redeem_join_token(&join).unwrap();

        assert_eq!(creds.expires_at - creds.issued_at, 6 * 3600);
        assert_eq!(auth.check_access(&creds.access_token).unwrap(), TokenStatus::Ok);
    }

    #[test]
    fn current_access_names_its_subject() {
        let store = StateStore::open_in_memory().unwrap();
        let auth = TokenAuthority::new(store.clone());
        let creds = auth.issue_credentials("node-7").unwrap();
        assert_eq!(
            auth.identify_access(&creds.access_token).unwrap(),
            (TokenStatus::Ok, Some("node-7".to_string()))
        );
        assert_eq!(
            auth.identify_access("never-issued").unwrap(),
            (TokenStatus::Unauthorized, None)
        );

        let expired = TokenAuthority::with_ttl(store, 0).issue_credentials("node-8").unwrap();
        assert_eq!(
            auth.identify_access(&expired.access_token).unwrap(),
            (TokenStatus::NotAcceptable, None)
        );
    }

    #[test]
    fn join_token_cannot_be_reused() {
        let auth = authority();
        let join = auth.issue_join_token().unwrap();

        auth.redeem_join_token(&join).unwrap();
        assert!(matches!(auth.redeem_join_token(&join), Err(AuthError::Unauthorized)));
        assert!(matches!(auth.redeem_join_token("never-issued"), Err(AuthError::Unauthorized)));
    }

    #[test]
    fn concurrent_join_redemption_succeeds_once() {
        let auth = authority();
        let join = auth.issue_join_token().unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let auth = auth.clone();
                    let join = join.clone();
                    let barrier = barrier.clone();
                    s.spawn(move || {
                        barrier.wait();
                        auth.redeem_join_token(&join)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(AuthError::Unauthorized)))
                .count(),
            1
        );
    }

    #[test]
    fn expired_token_is_not_acceptable() {
        let auth = TokenAuthority::with_ttl(StateStore::open_in_memory().unwrap(), 0);
        let creds = auth.issue_credentials("leader").unwrap();

        assert_eq!(
            auth.check_access(&creds.access_token).unwrap(),
            TokenStatus::NotAcceptable
        );
        assert_eq!(auth.check_access("bogus").unwrap(), TokenStatus::Unauthorized);
        assert_eq!(auth.check_access("").unwrap(), TokenStatus::Unauthorized);
    }

    #[test]
    fn refresh_invalidates_old_pair() {
        let auth = authority();
        let old = auth.issue_credentials("node-1").unwrap();
        let new = auth.refresh(&old.refresh_token).unwrap();

        assert_eq!(new.id, "node-1");
        assert_ne!(new.access_token, old.access_token);
        assert_ne!(new.refresh_token, old.refresh_token);
        assert_eq!(auth.check_access(&new.access_token).unwrap(), TokenStatus::Ok);
        assert_eq!(
            auth.check_access(&old.access_token).unwrap(),
            TokenStatus::Unauthorized
        );
        assert!(matches!(auth.refresh(&old.refresh_token), Err(AuthError::NotFound)));
    }

    #[test]
    fn expired_pair_can_be_refreshed() {
        let store = StateStore::open_in_memory().unwrap();
        let expired = TokenAuthority::with_ttl(store.clone(), 0);
        let old = expired.issue_credentials("node-1").unwrap();

        let auth = TokenAuthority::new(store);
        let new = auth.refresh(&old.refresh_token).unwrap();
        assert_eq!(auth.check_access(&new.access_token).unwrap(), TokenStatus::Ok);
    }

    #[test]
    fn concurrent_refresh_rotates_once() {
        let auth = authority();
        let old = auth.issue_credentials("node-1").unwrap();
        let barrier = Arc::new(Barrier::new(4));

        let results: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let auth = auth.clone();
                    let refresh = old.refresh_token.clone();
                    let barrier = barrier.clone();
                    s.spawn(move || {
                        barrier.wait();
                        auth.refresh(&refresh)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[test]
    fn api_token_lifecycle() {
        let auth = authority();
        let token = auth.issue_api_token().unwrap();

        assert_eq!(auth.check_api_token(&token).unwrap(), TokenStatus::Ok);
        auth.revoke_api_token(&token).unwrap();
        assert_eq!(auth.check_api_token(&token).unwrap(), TokenStatus::Unauthorized);
        assert!(matches!(auth.revoke_api_token(&token), Err(AuthError::Unauthorized)));
    }

    #[test]
    fn join_command_names_leader() {
        assert_eq!(
            join_command("squalld", "10.0.0.1", 6626, "abc"),
            "squalld follower --leader 10.0.0.1:6626 --join-token abc"
        );
    }
}
