//! One-shot HTTP/1 exchanges with a peer daemon.
//!
//! Every call opens a fresh connection, sends one request and reads the
//! whole response. Peers are few and calls are infrequent, so there is no
//! pooling.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use tracing::debug;

use crate::error::{TransportError, TransportResult};

pub const USER_AGENT: &str = "squalld/0.1";

/// Header carrying an API token instead of a bearer access token.
pub const API_TOKEN_HEADER: &str = "x-squall-api";

/// The `{success, data, error}` wrapper every endpoint answers with.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

/// A finished exchange.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Bytes,
}

impl Reply {
    /// Turn a non-2xx answer into an error, ignoring the body otherwise.
    pub fn ensure_success(self, address: &str) -> TransportResult<()> {
        if self.status.is_success() {
            return Ok(());
        }
        let message = serde_json::from_slice::<Envelope<serde_json::Value>>(&self.body)
            .ok()
            .and_then(|e| e.error)
            .unwrap_or_else(|| String::from_utf8_lossy(&self.body).into_owned());
        Err(TransportError::Status {
            address: address.to_string(),
            status: self.status.as_u16(),
            message,
        })
    }

    /// Decode the envelope's `data`, turning non-2xx into an error.
    pub fn into_data<T: serde::de::DeserializeOwned>(self, address: &str) -> TransportResult<T> {
        let envelope: Option<Envelope<T>> = serde_json::from_slice(&self.body).ok();
        if !self.status.is_success() {
            let message = envelope
                .and_then(|e| e.error)
                .unwrap_or_else(|| String::from_utf8_lossy(&self.body).into_owned());
            return Err(TransportError::Status {
                address: address.to_string(),
                status: self.status.as_u16(),
                message,
            });
        }
        let envelope = envelope.ok_or_else(|| TransportError::Decode {
            address: address.to_string(),
            reason: "response is not a json envelope".to_string(),
        })?;
        envelope.data.ok_or_else(|| TransportError::Decode {
            address: address.to_string(),
            reason: envelope.error.unwrap_or_else(|| "missing data".to_string()),
        })
    }
}

/// Send one request to `address` (`host:port`).
pub async fn send(
    address: &str,
    method: Method,
    path: &str,
    headers: &[(&str, String)],
    body: Option<Vec<u8>>,
    timeout: Duration,
) -> TransportResult<Reply> {
    let exchange = async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| TransportError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| TransportError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(path)
            .header("host", address)
            .header("user-agent", USER_AGENT);
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| TransportError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| TransportError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Decode {
                address: address.to_string(),
                reason: e.to_string(),
            })?
            .to_bytes();
        Ok(Reply { status, body })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => {
            if let Ok(reply) = &result {
                debug!(%address, %method, %path, status = %reply.status, "peer call");
            }
            result
        }
        Err(_) => {
            debug!(%address, %method, %path, "peer call timed out");
            Err(TransportError::Timeout {
                address: address.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_data_unwraps_success() {
        let reply = Reply {
            status: StatusCode::OK,
            body: Bytes::from_static(br#"{"success":true,"data":[1,2,3],"error":null}"#),
        };
        let data: Vec<u32> = reply.into_data("n1:6626").unwrap();
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[test]
    fn into_data_surfaces_error_message() {
        let reply = Reply {
            status: StatusCode::CONFLICT,
            body: Bytes::from_static(br#"{"success":false,"data":null,"error":"port 80 taken"}"#),
        };
        let err = reply.into_data::<()>("n1:6626").unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert!(err.to_string().contains("port 80 taken"));
    }

    #[test]
    fn into_data_tolerates_plain_error_bodies() {
        let reply = Reply {
            status: StatusCode::BAD_GATEWAY,
            body: Bytes::from_static(b"upstream down"),
        };
        let err = reply.into_data::<()>("n1:6626").unwrap_err();
        assert!(err.to_string().contains("upstream down"));
    }

    #[tokio::test]
    async fn unreachable_peer_is_connect_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let err = send(
            "127.0.0.1:9",
            Method::GET,
            "/api/health",
            &[],
            None,
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Connect { .. } | TransportError::Timeout { .. }
        ));
    }
}
