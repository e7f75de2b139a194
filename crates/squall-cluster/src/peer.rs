//! PeerClient — authenticated calls between daemons.
//!
//! Holds this daemon's access/refresh pair. Every call carries the access
//! token; a `406 Not Acceptable` answer means it expired, so the client
//! renews the pair once and repeats the call once.

use std::path::PathBuf;
use std::time::Duration;

use http::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use squall_auth::TokenAuthority;
use squall_state::ClientCredentials;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{TransportError, TransportResult};
use crate::wire::{self, Reply};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where an expired pair gets renewed.
pub enum Renewal {
    /// Followers renew against the leader's `/auth/refresh`.
    Remote { leader: String },
    /// The leader renews its own pair in-process.
    Local(TokenAuthority),
}

pub struct PeerClient {
    credentials: RwLock<Option<ClientCredentials>>,
    renewal: Renewal,
    refresh_lock: Mutex<()>,
    credentials_path: Option<PathBuf>,
    timeout: Duration,
}

impl PeerClient {
    pub fn new(renewal: Renewal) -> Self {
        Self {
            credentials: RwLock::new(None),
            renewal,
            refresh_lock: Mutex::new(()),
            credentials_path: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Persist the pair to `path` whenever it changes.
    pub fn with_credentials_file(mut self, path: PathBuf) -> Self {
        self.credentials_path = Some(path);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load a previously persisted pair. Returns false if there is none.
    pub async fn load_credentials(&self) -> TransportResult<bool> {
        let Some(path) = &self.credentials_path else {
            return Ok(false);
        };
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let creds: ClientCredentials =
            serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode {
                address: path.display().to_string(),
                reason: e.to_string(),
            })?;
        *self.credentials.write().await = Some(creds);
        debug!(path = %path.display(), "credentials loaded");
        Ok(true)
    }

    pub async fn set_credentials(&self, creds: ClientCredentials) -> TransportResult<()> {
        if let Some(path) = &self.credentials_path {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let bytes = serde_json::to_vec_pretty(&creds).map_err(|e| TransportError::Decode {
                address: path.display().to_string(),
                reason: e.to_string(),
            })?;
            tokio::fs::write(path, bytes).await?;
        }
        *self.credentials.write().await = Some(creds);
        Ok(())
    }

    pub async fn credentials(&self) -> Option<ClientCredentials> {
        self.credentials.read().await.clone()
    }

    async fn access_token(&self) -> TransportResult<String> {
        self.credentials
            .read()
            .await
            .as_ref()
            .map(|c| c.access_token.clone())
            .ok_or(TransportError::NoCredentials)
    }

    async fn send_with(
        &self,
        address: &str,
        method: &Method,
        path: &str,
        token: &str,
        body: Option<Vec<u8>>,
    ) -> TransportResult<Reply> {
        wire::send(
            address,
            method.clone(),
            path,
            &[("authorization", format!("Bearer {token}"))],
            body,
            self.timeout,
        )
        .await
    }

    /// Authenticated call; renews and retries once on `406`.
    pub async fn call(
        &self,
        address: &str,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> TransportResult<Reply> {
        let sent = self.access_token().await?;
        let reply = self
            .send_with(address, &method, path, &sent, body.clone())
            .await?;
        if reply.status != StatusCode::NOT_ACCEPTABLE {
            return Ok(reply);
        }

        debug!(%address, %path, "access token expired, renewing");
        self.renew(&sent).await?;
        let token = self.access_token().await?;
        self.send_with(address, &method, path, &token, body).await
    }

    /// Renew the pair, unless a concurrent caller already replaced `stale_access`.
    async fn renew(&self, stale_access: &str) -> TransportResult<()> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.credentials().await.ok_or(TransportError::NoCredentials)?;
        if current.access_token != stale_access {
            return Ok(());
        }

        let fresh = match &self.renewal {
            Renewal::Remote { leader } => {
                let reply = wire::send(
                    leader,
                    Method::GET,
                    "/auth/refresh",
                    &[("authorization", format!("Bearer {}", current.refresh_token))],
                    None,
                    self.timeout,
                )
                .await?;
                reply
                    .into_data::<ClientCredentials>(leader)
                    .map_err(|e| TransportError::Renewal(e.to_string()))?
            }
            Renewal::Local(authority) => authority
                .refresh(&current.refresh_token)
                .map_err(|e| TransportError::Renewal(e.to_string()))?,
        };
        info!(client = %fresh.id, "credentials renewed");
        self.set_credentials(fresh).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, address: &str, path: &str) -> TransportResult<T> {
        self.call(address, Method::GET, path, None)
            .await?
            .into_data(address)
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        address: &str,
        path: &str,
        body: &B,
    ) -> TransportResult<T> {
        let bytes = encode(address, body)?;
        self.call(address, Method::POST, path, Some(bytes))
            .await?
            .into_data(address)
    }

    /// POST whose answer carries nothing the caller needs.
    pub async fn post(&self, address: &str, path: &str, body: &impl Serialize) -> TransportResult<()> {
        let bytes = encode(address, body)?;
        self.call(address, Method::POST, path, Some(bytes))
            .await?
            .ensure_success(address)
    }

    pub async fn delete(&self, address: &str, path: &str, body: &impl Serialize) -> TransportResult<()> {
        let bytes = encode(address, body)?;
        self.call(address, Method::DELETE, path, Some(bytes))
            .await?
            .ensure_success(address)
    }

    /// Exchange a join token with the leader and keep the resulting pair.
    pub async fn redeem_join_token(
        &self,
        leader: &str,
        join_token: &str,
    ) -> TransportResult<ClientCredentials> {
        let reply = self
            .send_with(leader, &Method::GET, "/auth/token", join_token, None)
            .await?;
        let creds: ClientCredentials = reply.into_data(leader)?;
        self.set_credentials(creds.clone()).await?;
        info!(%leader, client = %creds.id, "joined with leader-issued credentials");
        Ok(creds)
    }

    /// Ask the leader how it classifies someone else's access token.
    ///
    /// A `200` carries the subject the token was issued to.
    pub async fn check_token(
        &self,
        leader: &str,
        token: &str,
    ) -> TransportResult<(StatusCode, Option<String>)> {
        let reply = self
            .send_with(leader, &Method::GET, "/auth/check", token, None)
            .await?;
        if reply.status != StatusCode::OK {
            return Ok((reply.status, None));
        }
        let subject: String = reply.into_data(leader)?;
        Ok((StatusCode::OK, Some(subject)))
    }
}

fn encode(address: &str, body: &impl Serialize) -> TransportResult<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| TransportError::Decode {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn creds(access: &str, refresh: &str) -> ClientCredentials {
        ClientCredentials {
            id: "follower".to_string(),
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            issued_at: 0,
            expires_at: u64::MAX,
        }
    }

    fn bearer(headers: &HeaderMap) -> String {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or_default()
            .to_string()
    }

    /// A leader stand-in: `/data` accepts only `new-access`, `/auth/refresh`
    /// rotates `old-refresh` into the new pair.
    async fn serve(refreshes: Arc<AtomicUsize>) -> String {
        let app = Router::new()
            .route(
                "/data",
                get(|headers: HeaderMap| async move {
                    if bearer(&headers) == "new-access" {
                        (http::StatusCode::OK, axum::Json(json!({"success": true, "data": 42})))
                    } else {
                        (
                            http::StatusCode::NOT_ACCEPTABLE,
                            axum::Json(json!({"success": false, "error": "expired"})),
                        )
                    }
                }),
            )
            .route(
                "/auth/refresh",
                get(move |headers: HeaderMap| {
                    let refreshes = refreshes.clone();
                    async move {
                        refreshes.fetch_add(1, Ordering::SeqCst);
                        if bearer(&headers) == "old-refresh" {
                            let data = creds("new-access", "new-refresh");
                            (http::StatusCode::OK, axum::Json(json!({"success": true, "data": data})))
                        } else {
                            (
                                http::StatusCode::NOT_FOUND,
                                axum::Json(json!({"success": false, "error": "unknown"})),
                            )
                        }
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn renews_on_406_and_retries_once() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let addr = serve(refreshes.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");

        let client = PeerClient::new(Renewal::Remote {
            leader: addr.clone(),
        })
        .with_credentials_file(path.clone());
        client
            .set_credentials(creds("old-access", "old-refresh"))
            .await
            .unwrap();

        let value: u32 = client.get_json(&addr, "/data").await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(
            client.credentials().await.unwrap().access_token,
            "new-access"
        );

        // The renewed pair was persisted and reloads.
        let reloaded = PeerClient::new(Renewal::Remote { leader: addr })
            .with_credentials_file(path);
        assert!(reloaded.load_credentials().await.unwrap());
        assert_eq!(
            reloaded.credentials().await.unwrap().refresh_token,
            "new-refresh"
        );
    }

    #[tokio::test]
    async fn failed_renewal_surfaces() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let addr = serve(refreshes).await;
        let client = PeerClient::new(Renewal::Remote {
            leader: addr.clone(),
        });
        client
            .set_credentials(creds("old-access", "revoked"))
            .await
            .unwrap();

        let err = client.get_json::<u32>(&addr, "/data").await.unwrap_err();
        assert!(matches!(err, TransportError::Renewal(_)));
    }

    #[tokio::test]
    async fn local_renewal_uses_authority() {
        let store = squall_state::StateStore::open_in_memory().unwrap();
        let authority = TokenAuthority::new(store);
        let own = authority.issue_credentials("leader").unwrap();

        let client = PeerClient::new(Renewal::Local(authority.clone()));
        client.set_credentials(own.clone()).await.unwrap();
        client.renew(&own.access_token).await.unwrap();

        let renewed = client.credentials().await.unwrap();
        assert_ne!(renewed.access_token, own.access_token);
        assert_eq!(
            authority.check_access(&renewed.access_token).unwrap(),
            squall_auth::TokenStatus::Ok
        );
    }

    #[tokio::test]
    async fn leader_check_reports_subject() {
        let app = Router::new().route(
            "/auth/check",
            get(|headers: HeaderMap| async move {
                if bearer(&headers) == "good" {
                    (http::StatusCode::OK, axum::Json(json!({"success": true, "data": "node-3"})))
                } else {
                    (
                        http::StatusCode::UNAUTHORIZED,
                        axum::Json(json!({"success": false, "error": "unknown access token"})),
                    )
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = PeerClient::new(Renewal::Remote {
            leader: addr.clone(),
        });
        assert_eq!(
            client.check_token(&addr, "good").await.unwrap(),
            (StatusCode::OK, Some("node-3".to_string()))
        );
        assert_eq!(
            client.check_token(&addr, "bad").await.unwrap(),
            (StatusCode::UNAUTHORIZED, None)
        );
    }

    #[tokio::test]
    async fn calls_without_credentials_fail_fast() {
        let client = PeerClient::new(Renewal::Remote {
            leader: "127.0.0.1:9".to_string(),
        });
        assert!(matches!(
            client.get_json::<u32>("127.0.0.1:9", "/x").await,
            Err(TransportError::NoCredentials)
        ));
        assert!(!client.load_credentials().await.unwrap());
    }
}
