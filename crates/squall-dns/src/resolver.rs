//! Service resolver over the record store.

use squall_state::{StateError, StateStore};
use thiserror::Error;
use tracing::debug;

pub type ResolveResult<T> = Result<T, ResolveError>;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no service answers to {0}")]
    NotFound(String),

    #[error("{fqdn} is on node {node}, which is not healthy")]
    Unavailable { fqdn: String, node: String },

    #[error("state error: {0}")]
    State(#[from] StateError),
}

/// The two labels of a name that select an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceName<'a> {
    pub hostname: &'a str,
    pub namespace: &'a str,
}

/// Split `web.prod.svc.` into hostname `web` and namespace `prod`.
///
/// The hostname is the third label from the end and the namespace the
/// second; whatever precedes the hostname is ignored. Names with fewer
/// than three labels select nothing.
pub fn parse_fqdn(fqdn: &str) -> Option<ServiceName<'_>> {
    let trimmed = fqdn.strip_suffix('.').unwrap_or(fqdn);
    let labels: Vec<&str> = trimmed.split('.').collect();
    if labels.len() < 3 || labels.iter().any(|l| l.is_empty()) {
        return None;
    }
    Some(ServiceName {
        hostname: labels[labels.len() - 3],
        namespace: labels[labels.len() - 2],
    })
}

#[derive(Clone)]
pub struct ServiceResolver {
    store: StateStore,
}

impl ServiceResolver {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Host of the healthy node running the application `fqdn` names.
    pub fn resolve(&self, fqdn: &str) -> ResolveResult<String> {
        let not_found = || ResolveError::NotFound(fqdn.to_string());
        let name = parse_fqdn(fqdn).ok_or_else(not_found)?;

        let app = self
            .store
            .list_applications()?
            .into_iter()
            .find(|a| {
                a.hostname.eq_ignore_ascii_case(name.hostname)
                    && a.namespace.eq_ignore_ascii_case(name.namespace)
            })
            .ok_or_else(not_found)?;
        let node = self.store.get_node(&app.node)?.ok_or_else(not_found)?;
        if !node.is_healthy() {
            return Err(ResolveError::Unavailable {
                fqdn: fqdn.to_string(),
                node: node.id,
            });
        }

        debug!(%fqdn, app = %app.id, host = %node.host, "resolved");
        Ok(node.host)
    }
}
