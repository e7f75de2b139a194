//! StateStore — redb-backed record persistence for Squall.
//!
//! Provides typed CRUD operations over applications, nodes, routes,
//! daemon self-state and credentials. Values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
type TokenSet = TableDefinition<'static, &'static str, u64>;

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Encode))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Decode))
}

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for def in [APPLICATIONS, NODES, CLIENTS, ROUTES, TOKEN_RECORDS, CLUSTER] {
            txn.open_table(def).map_err(map_err!(Table))?;
        }
        txn.open_table(JOIN_TOKENS).map_err(map_err!(Table))?;
        txn.open_table(API_TOKENS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ───────────────────────────────────────────

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Storage))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list_json<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    fn remove_json(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Storage))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Drop every row of `def` and write `rows` in its place, inside `txn`.
    fn overwrite_json(
        txn: &WriteTransaction,
        def: JsonTable,
        rows: &[(String, Vec<u8>)],
    ) -> StateResult<()> {
        let mut table = txn.open_table(def).map_err(map_err!(Table))?;
        let keys: Vec<String> = {
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Storage))? {
                let (key, _) = entry.map_err(map_err!(Storage))?;
                keys.push(key.value().to_string());
            }
            keys
        };
        for key in &keys {
            table.remove(key.as_str()).map_err(map_err!(Storage))?;
        }
        for (key, value) in rows {
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        Ok(())
    }

    fn overwrite_set(txn: &WriteTransaction, def: TokenSet, tokens: &[String]) -> StateResult<()> {
        let mut table = txn.open_table(def).map_err(map_err!(Table))?;
        let keys: Vec<String> = {
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Storage))? {
                let (key, _) = entry.map_err(map_err!(Storage))?;
                keys.push(key.value().to_string());
            }
            keys
        };
        for key in &keys {
            table.remove(key.as_str()).map_err(map_err!(Storage))?;
        }
        let now = epoch_secs();
        for token in tokens {
            table.insert(token.as_str(), now).map_err(map_err!(Storage))?;
        }
        Ok(())
    }

    // ── Applications ──────────────────────────────────────────────

    /// Insert or update an application without any checks.
    pub fn put_application(&self, app: &Application) -> StateResult<()> {
        self.put_json(APPLICATIONS, &app.id, app)?;
        debug!(id = %app.id, node = %app.node, "application stored");
        Ok(())
    }

    /// Insert or update an application, failing if another application
    /// already exposes one of its ports. Check and write share one
    /// transaction, so concurrent callers cannot both claim a port.
    pub fn put_application_checked(&self, app: &Application) -> StateResult<()> {
        let bytes = encode(app)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            let mut claimed = None;
            for entry in table.iter().map_err(map_err!(Storage))? {
                let (key, value) = entry.map_err(map_err!(Storage))?;
                if key.value() == app.id {
                    continue;
                }
                let other: Application = decode(value.value())?;
                if let Some(port) = other.claims_any(&app.ports) {
                    claimed = Some((port, other.id));
                    break;
                }
            }
            if let Some((port, owner)) = claimed {
                // Dropping the transaction without commit aborts it.
                return Err(StateError::PortClaimed { port, owner });
            }
            table
                .insert(app.id.as_str(), bytes.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %app.id, node = %app.node, "application stored (port-checked)");
        Ok(())
    }

    /// Get an application by id.
    pub fn get_application(&self, id: &str) -> StateResult<Option<Application>> {
        self.get_json(APPLICATIONS, id)
    }

    /// List all applications.
    pub fn list_applications(&self) -> StateResult<Vec<Application>> {
        self.list_json(APPLICATIONS)
    }

    /// List the applications assigned to one node.
    pub fn list_applications_for_node(&self, node_id: &str) -> StateResult<Vec<Application>> {
        Ok(self
            .list_applications()?
            .into_iter()
            .filter(|app| app.node == node_id)
            .collect())
    }

    /// Overwrite the status of an application. Returns false if it is gone.
    pub fn set_application_status(&self, id: &str, status: &ApplicationStatus) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let found;
        {
            let mut table = txn.open_table(APPLICATIONS).map_err(map_err!(Table))?;
            let current: Option<Application> = match table.get(id).map_err(map_err!(Storage))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            found = current.is_some();
            if let Some(mut app) = current {
                app.status = status.clone();
                let bytes = encode(&app)?;
                table
                    .insert(id, bytes.as_slice())
                    .map_err(map_err!(Storage))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(found)
    }

    /// Delete an application. Returns true if it existed.
    pub fn delete_application(&self, id: &str) -> StateResult<bool> {
        let existed = self.remove_json(APPLICATIONS, id)?;
        debug!(%id, existed, "application deleted");
        Ok(existed)
    }

    // ── Nodes ─────────────────────────────────────────────────────

    /// Insert or update a node record.
    pub fn put_node(&self, node: &Node) -> StateResult<()> {
        self.put_json(NODES, &node.id, node)
    }

    /// Store a node, assigning it the next registration ordinal.
    ///
    /// A node that is already known keeps its original ordinal and
    /// registration time.
    pub fn register_node(&self, node: &Node) -> StateResult<Node> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            let mut next = 0;
            let mut existing: Option<Node> = None;
            for entry in table.iter().map_err(map_err!(Storage))? {
                let (_, value) = entry.map_err(map_err!(Storage))?;
                let known: Node = decode(value.value())?;
                next = next.max(known.ordinal + 1);
                if known.id == node.id {
                    existing = Some(known);
                }
            }
            let mut node = node.clone();
            match existing {
                Some(prev) => {
                    node.ordinal = prev.ordinal;
                    node.registered_at = prev.registered_at;
                }
                None => {
                    node.ordinal = next;
                    node.registered_at = epoch_secs();
                }
            }
            let bytes = encode(&node)?;
            table
                .insert(node.id.as_str(), bytes.as_slice())
                .map_err(map_err!(Storage))?;
            stored = node;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %stored.id, ordinal = stored.ordinal, "node registered");
        Ok(stored)
    }

    /// Get a node by id.
    pub fn get_node(&self, node_id: &str) -> StateResult<Option<Node>> {
        self.get_json(NODES, node_id)
    }

    /// List all nodes in registration order.
    pub fn list_nodes(&self) -> StateResult<Vec<Node>> {
        let mut nodes: Vec<Node> = self.list_json(NODES)?;
        nodes.sort_by_key(|n| n.ordinal);
        Ok(nodes)
    }

    /// Delete a node. Returns true if it existed.
    pub fn delete_node(&self, node_id: &str) -> StateResult<bool> {
        self.remove_json(NODES, node_id)
    }

    // ── Daemon self-state ─────────────────────────────────────────

    pub fn put_client_state(&self, state: &ClientState) -> StateResult<()> {
        self.put_json(CLIENTS, &state.id, state)
    }

    pub fn get_client_state(&self, id: &str) -> StateResult<Option<ClientState>> {
        self.get_json(CLIENTS, id)
    }

    // ── Membership ────────────────────────────────────────────────

    pub fn put_membership(&self, membership: &ClusterMembership) -> StateResult<()> {
        self.put_json(CLUSTER, MEMBERSHIP_KEY, membership)
    }

    /// The leader's last persisted lists, empty if none were written yet.
    pub fn get_membership(&self) -> StateResult<ClusterMembership> {
        Ok(self.get_json(CLUSTER, MEMBERSHIP_KEY)?.unwrap_or_default())
    }

    // ── Routes ────────────────────────────────────────────────────

    pub fn put_route(&self, route: &Route) -> StateResult<()> {
        self.put_json(ROUTES, &route.id, route)
    }

    /// Insert or update a route, failing if another route already uses its
    /// alias in the same namespace, ignoring case. Check and write share
    /// one transaction.
    pub fn put_route_checked(&self, route: &Route) -> StateResult<()> {
        let bytes = encode(route)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROUTES).map_err(map_err!(Table))?;
            let mut claimed = None;
            for entry in table.iter().map_err(map_err!(Storage))? {
                let (key, value) = entry.map_err(map_err!(Storage))?;
                if key.value() == route.id {
                    continue;
                }
                let other: Route = decode(value.value())?;
                if other.alias.eq_ignore_ascii_case(&route.alias)
                    && other.namespace.eq_ignore_ascii_case(&route.namespace)
                {
                    claimed = Some(other.id);
                    break;
                }
            }
            if let Some(owner) = claimed {
                return Err(StateError::AliasClaimed {
                    alias: route.alias.clone(),
                    namespace: route.namespace.clone(),
                    owner,
                });
            }
            table
                .insert(route.id.as_str(), bytes.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %route.id, alias = %route.alias, "route stored (alias-checked)");
        Ok(())
    }

    pub fn get_route(&self, id: &str) -> StateResult<Option<Route>> {
        self.get_json(ROUTES, id)
    }

    pub fn list_routes(&self) -> StateResult<Vec<Route>> {
        self.list_json(ROUTES)
    }

    pub fn delete_route(&self, id: &str) -> StateResult<bool> {
        self.remove_json(ROUTES, id)
    }

    // ── Access / refresh pairs ────────────────────────────────────

    /// Insert or replace the pair issued to `record.id`.
    pub fn put_token_record(&self, record: &TokenRecord) -> StateResult<()> {
        self.put_json(TOKEN_RECORDS, &record.id, record)
    }

    pub fn list_token_records(&self) -> StateResult<Vec<TokenRecord>> {
        self.list_json(TOKEN_RECORDS)
    }

    /// Find the pair whose access token equals `access_token`.
    pub fn find_token_by_access(&self, access_token: &str) -> StateResult<Option<TokenRecord>> {
        Ok(self
            .list_token_records()?
            .into_iter()
            .find(|rec| rec.access_token == access_token))
    }

    /// Replace the pair holding `refresh_token` with `rotate(old)`.
    ///
    /// Lookup and replacement share one write transaction: of several
    /// concurrent callers presenting the same refresh token, exactly one
    /// gets `Some`.
    pub fn rotate_token_record<F>(&self, refresh_token: &str, rotate: F) -> StateResult<Option<TokenRecord>>
    where
        F: FnOnce(&TokenRecord) -> TokenRecord,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let rotated;
        {
            let mut table = txn.open_table(TOKEN_RECORDS).map_err(map_err!(Table))?;
            let hit: Option<TokenRecord> = {
                let mut hit = None;
                for entry in table.iter().map_err(map_err!(Storage))? {
                    let (_, value) = entry.map_err(map_err!(Storage))?;
                    let rec: TokenRecord = decode(value.value())?;
                    if rec.refresh_token == refresh_token {
                        hit = Some(rec);
                        break;
                    }
                }
                hit
            };
            rotated = match hit {
                Some(old) => {
                    let new = rotate(&old);
                    table.remove(old.id.as_str()).map_err(map_err!(Storage))?;
                    let bytes = encode(&new)?;
                    table
                        .insert(new.id.as_str(), bytes.as_slice())
                        .map_err(map_err!(Storage))?;
                    Some(new)
                }
                None => None,
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(rotated)
    }

    // ── Join tokens ───────────────────────────────────────────────

    pub fn insert_join_token(&self, token: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOIN_TOKENS).map_err(map_err!(Table))?;
            table.insert(token, epoch_secs()).map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Remove a join token and report whether it was outstanding.
    pub fn take_join_token(&self, token: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let taken;
        {
            let mut table = txn.open_table(JOIN_TOKENS).map_err(map_err!(Table))?;
            taken = table.remove(token).map_err(map_err!(Storage))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(taken)
    }

    /// Redeem a join token and persist the pair built by `issue` in the
    /// same transaction. `None` if the token was not outstanding.
    pub fn redeem_join_token<F>(&self, token: &str, issue: F) -> StateResult<Option<TokenRecord>>
    where
        F: FnOnce() -> TokenRecord,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let issued;
        {
            let mut joins = txn.open_table(JOIN_TOKENS).map_err(map_err!(Table))?;
            let taken = joins.remove(token).map_err(map_err!(Storage))?.is_some();
            issued = if taken {
                let record = issue();
                let bytes = encode(&record)?;
                let mut records = txn.open_table(TOKEN_RECORDS).map_err(map_err!(Table))?;
                records
                    .insert(record.id.as_str(), bytes.as_slice())
                    .map_err(map_err!(Storage))?;
                Some(record)
            } else {
                None
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(issued)
    }

    // ── API tokens ────────────────────────────────────────────────

    pub fn insert_api_token(&self, token: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(API_TOKENS).map_err(map_err!(Table))?;
            table.insert(token, epoch_secs()).map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn remove_api_token(&self, token: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(API_TOKENS).map_err(map_err!(Table))?;
            existed = table.remove(token).map_err(map_err!(Storage))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    pub fn has_api_token(&self, token: &str) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(API_TOKENS).map_err(map_err!(Table))?;
        Ok(table.get(token).map_err(map_err!(Storage))?.is_some())
    }

    pub fn list_api_tokens(&self) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(API_TOKENS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (key, _) = entry.map_err(map_err!(Storage))?;
            results.push(key.value().to_string());
        }
        Ok(results)
    }

    // ── Replication ───────────────────────────────────────────────

    /// Snapshot everything a follower mirrors.
    pub fn sync_package(&self, membership: ClusterMembership) -> StateResult<SyncPackage> {
        Ok(SyncPackage {
            membership,
            nodes: self.list_nodes()?,
            applications: self.list_applications()?,
            token_records: self.list_token_records()?,
            api_tokens: self.list_api_tokens()?,
            routes: self.list_routes()?,
        })
    }

    /// Overwrite the mirror with a package pushed by the leader.
    ///
    /// Statuses of applications assigned to `local_node` are kept from
    /// the local copy: this node observes them first-hand.
    pub fn apply_sync(&self, package: &SyncPackage, local_node: &str) -> StateResult<()> {
        let local_status: HashMap<String, ApplicationStatus> = self
            .list_applications_for_node(local_node)?
            .into_iter()
            .map(|app| (app.id, app.status))
            .collect();

        let mut apps = Vec::with_capacity(package.applications.len());
        for app in &package.applications {
            let mut app = app.clone();
            if let Some(status) = local_status.get(&app.id) {
                app.status = status.clone();
            }
            apps.push((app.id.clone(), encode(&app)?));
        }
        let nodes = package
            .nodes
            .iter()
            .map(|n| Ok((n.id.clone(), encode(n)?)))
            .collect::<StateResult<Vec<_>>>()?;
        let records = package
            .token_records
            .iter()
            .map(|r| Ok((r.id.clone(), encode(r)?)))
            .collect::<StateResult<Vec<_>>>()?;
        let routes = package
            .routes
            .iter()
            .map(|r| Ok((r.id.clone(), encode(r)?)))
            .collect::<StateResult<Vec<_>>>()?;
        let membership = encode(&package.membership)?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        Self::overwrite_json(&txn, APPLICATIONS, &apps)?;
        Self::overwrite_json(&txn, NODES, &nodes)?;
        Self::overwrite_json(&txn, TOKEN_RECORDS, &records)?;
        Self::overwrite_json(&txn, ROUTES, &routes)?;
        Self::overwrite_set(&txn, API_TOKENS, &package.api_tokens)?;
        {
            let mut table = txn.open_table(CLUSTER).map_err(map_err!(Table))?;
            table
                .insert(MEMBERSHIP_KEY, membership.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            applications = package.applications.len(),
            nodes = package.nodes.len(),
            "sync package applied"
        );
        Ok(())
    }
}
