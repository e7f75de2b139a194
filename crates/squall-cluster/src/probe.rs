//! Retrying liveness probes.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::TransportResult;

/// How hard to try before calling a follower unreachable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbePolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Run `probe` until it succeeds or the policy's attempts are spent.
///
/// Returns the last error when every attempt failed.
pub async fn probe_with_retry<T, F, Fut>(policy: ProbePolicy, target: &str, mut probe: F) -> TransportResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TransportResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match probe().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                debug!(%target, attempt, error = %e, "probe failed, retrying");
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(attempts: u32) -> ProbePolicy {
        ProbePolicy {
            attempts,
            delay: Duration::from_millis(1),
        }
    }

    fn unreachable() -> TransportError {
        TransportError::Connect {
            address: "10.0.0.9:7000".to_string(),
            reason: "refused".to_string(),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let value = probe_with_retry(quick(3), "n1", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(unreachable())
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_policy_attempts() {
        let calls = AtomicU32::new(0);
        let result: TransportResult<()> = probe_with_retry(quick(3), "n1", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(unreachable())
        })
        .await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempts_still_probes_once() {
        let calls = AtomicU32::new(0);
        let _ = probe_with_retry(quick(0), "n1", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TransportError>(())
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
