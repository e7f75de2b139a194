//! ResourceScheduler — assigns applications to nodes and owns lifecycle edits.
//!
//! Every mutating call holds one async mutex for its whole
//! read-decide-write sequence, and the final write is a port-checked store
//! insert. Two overlapping requests therefore cannot both succeed, and a
//! rejected request leaves the store untouched.

use squall_state::{
    Application, ApplicationPatch, ApplicationSpec, ApplicationStatus, StateError, StateStore,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::capacity::{NodeCapacity, node_capacity};
use crate::error::{SchedulerError, SchedulerResult};
use crate::placer::first_fit;

pub struct ResourceScheduler {
    store: StateStore,
    lock: Mutex<()>,
}

impl ResourceScheduler {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Availability of every node in registration order.
    pub fn capacities(&self) -> SchedulerResult<Vec<NodeCapacity>> {
        let apps = self.store.list_applications()?;
        Ok(self
            .store
            .list_nodes()?
            .iter()
            .map(|node| node_capacity(node, &apps))
            .collect())
    }

    /// Place a new application.
    ///
    /// With `desired_node` the node is the only candidate (and must exist);
    /// otherwise every healthy node is considered in registration order.
    pub async fn schedule(
        &self,
        spec: &ApplicationSpec,
        desired_node: Option<&str>,
    ) -> SchedulerResult<Application> {
        validate(spec)?;
        let _guard = self.lock.lock().await;

        let apps = self.store.list_applications()?;
        if let Some(port) = spec
            .ports
            .keys()
            .find(|port| apps.iter().any(|app| app.ports.contains_key(port)))
        {
            return Err(SchedulerError::Conflict(format!("port {port} already claimed")));
        }
        if apps.iter().any(|app| app.name == spec.name) {
            return Err(SchedulerError::Conflict(format!(
                "application name {} already in use",
                spec.name
            )));
        }
        // Lookups ignore case, so claims must too.
        if apps.iter().any(|app| {
            app.hostname.eq_ignore_ascii_case(&spec.hostname)
                && app.namespace.eq_ignore_ascii_case(&spec.namespace)
        }) {
            return Err(SchedulerError::Conflict(format!(
                "hostname {}.{} already in use",
                spec.hostname, spec.namespace
            )));
        }

        let candidates = match desired_node {
            Some(id) => {
                let node = self
                    .store
                    .get_node(id)?
                    .ok_or_else(|| SchedulerError::NotFound(format!("node {id}")))?;
                vec![node]
            }
            None => self
                .store
                .list_nodes()?
                .into_iter()
                .filter(|node| node.is_healthy())
                .collect(),
        };
        let capacities: Vec<NodeCapacity> = candidates
            .iter()
            .map(|node| node_capacity(node, &apps))
            .collect();

        let Some(chosen) = first_fit(&capacities, spec.cpu, spec.memory) else {
            warn!(
                name = %spec.name,
                cpu = spec.cpu,
                memory = spec.memory,
                candidates = capacities.len(),
                "no node can fit application"
            );
            return Err(SchedulerError::InsufficientResources {
                cpu: spec.cpu,
                memory: spec.memory,
            });
        };

        let app = Application {
            id: uuid::Uuid::new_v4().to_string(),
            node: chosen.node_id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            hostname: spec.hostname.clone(),
            namespace: spec.namespace.clone(),
            env: spec.env.clone(),
            ports: spec.ports.clone(),
            mounts: spec.mounts.clone(),
            cpu: spec.cpu,
            memory: spec.memory,
            revision: 0,
            status: ApplicationStatus::default(),
        };
        self.store.put_application_checked(&app).map_err(port_conflict)?;

        info!(id = %app.id, name = %app.name, node = %app.node, "application scheduled");
        Ok(app)
    }

    /// Apply a partial update.
    ///
    /// Name, hostname, node, cpu and memory may be repeated but not changed.
    /// Image, env, ports and mounts are replaced when given. The revision is
    /// bumped so the owning node redeploys.
    pub async fn update(&self, id: &str, patch: &ApplicationPatch) -> SchedulerResult<Application> {
        let _guard = self.lock.lock().await;
        let mut app = self.load(id)?;

        immutable("name", patch.name.as_ref(), &app.name)?;
        immutable("hostname", patch.hostname.as_ref(), &app.hostname)?;
        immutable("node", patch.node.as_ref(), &app.node)?;
        immutable("memory", patch.memory.as_ref(), &app.memory)?;
        if patch.cpu.is_some_and(|cpu| (cpu - app.cpu).abs() > f64::EPSILON) {
            return Err(SchedulerError::Conflict("cpu cannot be changed".to_string()));
        }

        if let Some(image) = patch.image.as_ref().filter(|i| !i.is_empty()) {
            app.image = image.clone();
        }
        if let Some(env) = &patch.env {
            app.env = env.clone();
        }
        if let Some(ports) = &patch.ports {
            app.ports = ports.clone();
        }
        if let Some(mounts) = &patch.mounts {
            app.mounts = mounts.clone();
        }
        app.revision += 1;

        self.store.put_application_checked(&app).map_err(port_conflict)?;
        info!(%id, revision = app.revision, "application updated");
        Ok(app)
    }

    /// Force a redeploy on the owning node without changing the spec.
    pub async fn restart(&self, id: &str) -> SchedulerResult<Application> {
        let _guard = self.lock.lock().await;
        let mut app = self.load(id)?;
        app.revision += 1;
        app.status = ApplicationStatus {
            state: "restarting".to_string(),
            ..Default::default()
        };
        self.store.put_application(&app)?;
        info!(%id, revision = app.revision, "application restart requested");
        Ok(app)
    }

    /// Remove an application. Its node tears the container down next tick.
    pub async fn delete(&self, id: &str) -> SchedulerResult<Application> {
        let _guard = self.lock.lock().await;
        let app = self.load(id)?;
        self.store.delete_application(id)?;
        info!(%id, node = %app.node, "application deleted");
        Ok(app)
    }

    fn load(&self, id: &str) -> SchedulerResult<Application> {
        self.store
            .get_application(id)?
            .ok_or_else(|| SchedulerError::NotFound(format!("application {id}")))
    }
}

fn validate(spec: &ApplicationSpec) -> SchedulerResult<()> {
    if spec.name.trim().is_empty() {
        return Err(SchedulerError::Invalid("name is required".to_string()));
    }
    if spec.image.trim().is_empty() {
        return Err(SchedulerError::Invalid("image is required".to_string()));
    }
    if spec.hostname.trim().is_empty() || spec.hostname.contains('.') {
        return Err(SchedulerError::Invalid(
            "hostname must be a single non-empty label".to_string(),
        ));
    }
    if !(spec.cpu.is_finite() && spec.cpu > 0.0) || spec.memory == 0 {
        return Err(SchedulerError::Invalid(
            "cpu and memory must be positive".to_string(),
        ));
    }
    Ok(())
}

fn immutable<T: PartialEq + std::fmt::Debug>(
    field: &str,
    requested: Option<&T>,
    current: &T,
) -> SchedulerResult<()> {
    match requested {
        Some(value) if value != current => Err(SchedulerError::Conflict(format!(
            "{field} cannot be changed"
        ))),
        _ => Ok(()),
    }
}

fn port_conflict(err: StateError) -> SchedulerError {
    match err {
        StateError::PortClaimed { port, owner } => {
            SchedulerError::Conflict(format!("port {port} already claimed by {owner}"))
        }
        other => SchedulerError::State(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use squall_state::{Node, NodeHealth, Role, SystemInfo};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * MB;

    fn node(id: &str, cpu: f64, memory: u64, health: NodeHealth) -> Node {
        Node {
            id: id.to_string(),
            host: format!("{id}.local"),
            port: 6626,
            role: Role::Follower,
            health,
            system: SystemInfo {
                cpu_allocatable: cpu,
                memory_allocatable: memory,
                ..Default::default()
            },
            ordinal: 0,
            registered_at: 0,
        }
    }

    fn spec(name: &str, cpu: f64, memory: u64, ports: &[u16]) -> ApplicationSpec {
        ApplicationSpec {
            name: name.to_string(),
            image: "nginx:latest".to_string(),
            hostname: name.to_string(),
            namespace: "default".to_string(),
            env: BTreeMap::new(),
            ports: ports.iter().map(|p| (*p, 80)).collect(),
            mounts: BTreeMap::new(),
            cpu,
            memory,
            node: None,
        }
    }

    fn scheduler_with(nodes: &[Node]) -> (StateStore, ResourceScheduler) {
        let store = StateStore::open_in_memory().unwrap();
        for n in nodes {
            store.register_node(n).unwrap();
        }
        (store.clone(), ResourceScheduler::new(store))
    }

    #[tokio::test]
    async fn fits_then_runs_out() {
        let (store, scheduler) = scheduler_with(&[node("n1", 2.0, GB, NodeHealth::Healthy)]);

        let app = scheduler.schedule(&spec("a", 1.0, 512 * MB, &[]), None).await.unwrap();
        assert_eq!(app.node, "n1");

        let err = scheduler.schedule(&spec("b", 2.0, MB, &[]), None).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InsufficientResources { .. }));
        assert_eq!(store.list_applications().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn first_fit_falls_through_to_second_node() {
        let (_, scheduler) = scheduler_with(&[
            node("n1", 1.0, 512 * MB, NodeHealth::Healthy),
            node("n2", 4.0, 4 * GB, NodeHealth::Healthy),
        ]);

        let app = scheduler.schedule(&spec("a", 2.0, GB, &[]), None).await.unwrap();
        assert_eq!(app.node, "n2");
    }

    #[tokio::test]
    async fn unhealthy_nodes_are_not_candidates() {
        let (_, scheduler) = scheduler_with(&[
            node("n1", 8.0, 8 * GB, NodeHealth::Unknown),
            node("n2", 8.0, 8 * GB, NodeHealth::Unhealthy),
            node("n3", 1.0, GB, NodeHealth::Healthy),
        ]);

        let app = scheduler.schedule(&spec("a", 1.0, GB, &[]), None).await.unwrap();
        assert_eq!(app.node, "n3");
    }

    #[tokio::test]
    async fn desired_node_is_the_only_candidate() {
        let (_, scheduler) = scheduler_with(&[
            node("n1", 8.0, 8 * GB, NodeHealth::Healthy),
            node("n2", 1.0, GB, NodeHealth::Healthy),
        ]);

        let app = scheduler.schedule(&spec("a", 1.0, GB, &[]), Some("n2")).await.unwrap();
        assert_eq!(app.node, "n2");

        let err = scheduler.schedule(&spec("b", 1.0, GB, &[]), Some("n2")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InsufficientResources { .. }));

        let err = scheduler.schedule(&spec("c", 1.0, GB, &[]), Some("n9")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[tokio::test]
    async fn port_conflict_leaves_store_unchanged() {
        let (store, scheduler) = scheduler_with(&[node("n1", 8.0, 8 * GB, NodeHealth::Healthy)]);
        scheduler.schedule(&spec("a", 1.0, MB, &[8080]), None).await.unwrap();
        let before = store.list_applications().unwrap();

        let err = scheduler
            .schedule(&spec("b", 1.0, MB, &[9000, 8080]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Conflict(_)));
        assert_eq!(store.list_applications().unwrap(), before);
    }

    #[tokio::test]
    async fn concurrent_overlapping_ports_admit_one() {
        let (store, scheduler) = scheduler_with(&[node("n1", 8.0, 8 * GB, NodeHealth::Healthy)]);
        let scheduler = Arc::new(scheduler);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move {
                    scheduler
                        .schedule(&spec(&format!("app{i}"), 0.1, MB, &[8080]), None)
                        .await
                })
            })
            .collect();
        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(store.list_applications().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_name_is_conflict() {
        let (_, scheduler) = scheduler_with(&[node("n1", 8.0, 8 * GB, NodeHealth::Healthy)]);
        scheduler.schedule(&spec("a", 1.0, MB, &[]), None).await.unwrap();

        let mut again = spec("a", 1.0, MB, &[]);
        again.hostname = "other".to_string();
        let err = scheduler.schedule(&again, None).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Conflict(_)));
    }

    #[tokio::test]
    async fn hostname_differing_only_in_case_is_conflict() {
        let (store, scheduler) = scheduler_with(&[node("n1", 8.0, 8 * GB, NodeHealth::Healthy)]);
        scheduler.schedule(&spec("web", 1.0, MB, &[]), None).await.unwrap();

        let mut shouting = spec("web2", 1.0, MB, &[]);
        shouting.hostname = "WEB".to_string();
        shouting.namespace = "Default".to_string();
        let err = scheduler.schedule(&shouting, None).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Conflict(_)));
        assert_eq!(store.list_applications().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_spec_is_rejected_before_placement() {
        let (_, scheduler) = scheduler_with(&[node("n1", 8.0, 8 * GB, NodeHealth::Healthy)]);
        let err = scheduler.schedule(&spec("a", 0.0, MB, &[]), None).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Invalid(_)));

        let mut dotted = spec("b", 1.0, MB, &[]);
        dotted.hostname = "b.c".to_string();
        assert!(matches!(
            scheduler.schedule(&dotted, None).await,
            Err(SchedulerError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn update_replaces_mutable_fields_and_bumps_revision() {
        let (_, scheduler) = scheduler_with(&[node("n1", 8.0, 8 * GB, NodeHealth::Healthy)]);
        let app = scheduler.schedule(&spec("a", 1.0, MB, &[8080]), None).await.unwrap();

        let patch = ApplicationPatch {
            name: Some("a".to_string()),
            image: Some("nginx:2".to_string()),
            env: Some(BTreeMap::from([("K".to_string(), "V".to_string())])),
            ..Default::default()
        };
        let updated = scheduler.update(&app.id, &patch).await.unwrap();
        assert_eq!(updated.image, "nginx:2");
        assert_eq!(updated.env.get("K").map(String::as_str), Some("V"));
        assert_eq!(updated.ports, app.ports);
        assert_eq!(updated.revision, 1);
    }

    #[tokio::test]
    async fn update_rejects_identity_changes() {
        let (_, scheduler) = scheduler_with(&[node("n1", 8.0, 8 * GB, NodeHealth::Healthy)]);
        let app = scheduler.schedule(&spec("a", 1.0, MB, &[]), None).await.unwrap();

        for patch in [
            ApplicationPatch { name: Some("b".to_string()), ..Default::default() },
            ApplicationPatch { hostname: Some("b".to_string()), ..Default::default() },
            ApplicationPatch { node: Some("n2".to_string()), ..Default::default() },
            ApplicationPatch { cpu: Some(2.0), ..Default::default() },
            ApplicationPatch { memory: Some(2 * MB), ..Default::default() },
        ] {
            assert!(matches!(
                scheduler.update(&app.id, &patch).await,
                Err(SchedulerError::Conflict(_))
            ));
        }
    }

    #[tokio::test]
    async fn update_checks_new_ports() {
        let (_, scheduler) = scheduler_with(&[node("n1", 8.0, 8 * GB, NodeHealth::Healthy)]);
        scheduler.schedule(&spec("a", 1.0, MB, &[8080]), None).await.unwrap();
        let b = scheduler.schedule(&spec("b", 1.0, MB, &[9090]), None).await.unwrap();

        let patch = ApplicationPatch {
            ports: Some(BTreeMap::from([(8080, 80)])),
            ..Default::default()
        };
        assert!(matches!(
            scheduler.update(&b.id, &patch).await,
            Err(SchedulerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn restart_and_delete() {
        let (store, scheduler) = scheduler_with(&[node("n1", 8.0, 8 * GB, NodeHealth::Healthy)]);
        let app = scheduler.schedule(&spec("a", 1.0, MB, &[]), None).await.unwrap();

        let restarted = scheduler.restart(&app.id).await.unwrap();
        assert_eq!(restarted.revision, 1);
        assert_eq!(restarted.node, app.node);

        scheduler.delete(&app.id).await.unwrap();
        assert!(store.get_application(&app.id).unwrap().is_none());
        assert!(matches!(
            scheduler.restart(&app.id).await,
            Err(SchedulerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn capacities_follow_registration_order() {
        let (_, scheduler) = scheduler_with(&[
            node("z", 1.0, GB, NodeHealth::Healthy),
            node("a", 2.0, GB, NodeHealth::Healthy),
        ]);
        let ids: Vec<_> = scheduler
            .capacities()
            .unwrap()
            .into_iter()
            .map(|c| c.node_id)
            .collect();
        assert_eq!(ids, vec!["z", "a"]);
    }
}
