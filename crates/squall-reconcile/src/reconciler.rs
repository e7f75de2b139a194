//! Reconciler — one node's convergence loop.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use squall_state::{Application, ApplicationStatus, StateStore, SystemInfo, epoch_secs};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::{ContainerEngine, ContainerSummary};
use crate::mounts;
use crate::system::{Reservation, SystemProbe, system_info};

/// Static settings for one node's reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub node_id: String,
    /// Parent directory of per-application mount directories.
    pub volume_root: PathBuf,
    pub reservation: Reservation,
    /// Containers never destroyed, even if they carry a stale app label.
    pub infrastructure: Vec<String>,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Application ids (re)deployed.
    pub deployed: Vec<String>,
    /// Container names removed.
    pub destroyed: Vec<String>,
    /// Application ids or container names whose operation failed.
    pub failed: Vec<String>,
    /// Statuses written back to the store.
    pub statuses: usize,
    /// Set when the tick could not read desired or actual state at all.
    pub skipped: bool,
}

impl TickReport {
    pub fn is_noop(&self) -> bool {
        self.deployed.is_empty() && self.destroyed.is_empty()
    }
}

pub struct Reconciler {
    config: ReconcilerConfig,
    store: StateStore,
    engine: Arc<dyn ContainerEngine>,
    probe: Arc<dyn SystemProbe>,
    /// Ticks never overlap, whoever drives them.
    tick_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        store: StateStore,
        engine: Arc<dyn ContainerEngine>,
        probe: Arc<dyn SystemProbe>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            probe,
            tick_lock: Mutex::new(()),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Tick forever. Individual failures are logged, never fatal.
    pub async fn run(self: Arc<Self>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(node = %self.config.node_id, ?every, "reconciler started");
        loop {
            interval.tick().await;
            let report = self.tick().await;
            if !report.is_noop() || !report.failed.is_empty() {
                info!(
                    deployed = report.deployed.len(),
                    destroyed = report.destroyed.len(),
                    failed = report.failed.len(),
                    "reconcile tick"
                );
            }
        }
    }

    /// One pass: deploy, destroy, report status, report system.
    pub async fn tick(&self) -> TickReport {
        let _guard = self.tick_lock.lock().await;
        let mut report = TickReport::default();

        let desired = match self.store.list_applications_for_node(&self.config.node_id) {
            Ok(apps) => apps,
            Err(e) => {
                warn!(error = %e, "reconcile: cannot read desired applications");
                report.skipped = true;
                return report;
            }
        };
        let mut containers = match self.engine.list().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "reconcile: cannot list containers");
                report.skipped = true;
                return report;
            }
        };

        let removed = self.deploy_missing(&desired, &containers, &mut report).await;
        self.destroy_unwanted(&desired, &containers, &removed, &mut report)
            .await;

        if !report.is_noop() {
            match self.engine.list().await {
                Ok(list) => containers = list,
                Err(e) => warn!(error = %e, "reconcile: cannot re-list containers"),
            }
        }
        self.record_statuses(&desired, &containers, &mut report).await;
        self.record_system(&desired).await;

        debug!(
            node = %self.config.node_id,
            desired = desired.len(),
            deployed = report.deployed.len(),
            destroyed = report.destroyed.len(),
            "tick complete"
        );
        report
    }

    async fn deploy_missing(
        &self,
        desired: &[Application],
        containers: &[ContainerSummary],
        report: &mut TickReport,
    ) -> HashSet<String> {
        let mut removed = HashSet::new();
        let by_app: HashMap<&str, &ContainerSummary> = containers
            .iter()
            .filter_map(|c| c.app_id.as_deref().map(|id| (id, c)))
            .collect();
        let wanted: HashSet<&str> = desired.iter().map(|app| app.id.as_str()).collect();

        for app in desired {
            let name = app.container_name();
            let current = by_app.get(app.id.as_str());
            let converged = current.is_some_and(|c| {
                c.running && c.name == name && c.digest.as_deref() == Some(app.digest().as_str())
            });
            if converged {
                continue;
            }

            // Anything holding the name or this app's label goes first.
            let mut stale: Vec<&ContainerSummary> =
                containers.iter().filter(|c| c.name == name).collect();
            if let Some(c) = current.filter(|c| c.name != name) {
                stale.push(c);
            }
            for old in stale {
                removed.insert(old.name.clone());
                if let Err(e) = self.engine.remove(&old.name).await {
                    debug!(container = %old.name, error = %e, "stale container removal failed");
                    continue;
                }
                // A deleted app whose name was reused leaves its volumes behind otherwise.
                let Some(old_id) = old.app_id.as_deref() else {
                    continue;
                };
                if old_id != app.id && !wanted.contains(old_id) {
                    if let Err(e) = mounts::remove_all(&self.config.volume_root, old_id).await {
                        warn!(app_id = %old_id, error = %e, "cannot remove mount directories");
                    }
                }
            }

            let bindings = mounts::bindings(&self.config.volume_root, app);
            if let Err(e) = mounts::provision(&bindings).await {
                warn!(id = %app.id, error = %e, "cannot provision mount directories");
                report.failed.push(app.id.clone());
                continue;
            }
            match self.engine.run(app, &bindings).await {
                Ok(()) => {
                    info!(id = %app.id, name = %app.name, image = %app.image, "application deployed");
                    report.deployed.push(app.id.clone());
                }
                Err(e) => {
                    warn!(id = %app.id, name = %app.name, error = %e, "deploy failed");
                    report.failed.push(app.id.clone());
                }
            }
        }
        removed
    }

    async fn destroy_unwanted(
        &self,
        desired: &[Application],
        containers: &[ContainerSummary],
        already_removed: &HashSet<String>,
        report: &mut TickReport,
    ) {
        let wanted: HashSet<&str> = desired.iter().map(|app| app.id.as_str()).collect();
        for container in containers {
            let Some(app_id) = container.app_id.as_deref() else {
                continue;
            };
            if wanted.contains(app_id)
                || already_removed.contains(&container.name)
                || self.config.infrastructure.contains(&container.name)
            {
                continue;
            }
            match self.engine.remove(&container.name).await {
                Ok(()) => {
                    info!(container = %container.name, %app_id, "unassigned container destroyed");
                    if let Err(e) = mounts::remove_all(&self.config.volume_root, app_id).await {
                        warn!(%app_id, error = %e, "cannot remove mount directories");
                    }
                    report.destroyed.push(container.name.clone());
                }
                Err(e) => {
                    warn!(container = %container.name, error = %e, "destroy failed");
                    report.failed.push(container.name.clone());
                }
            }
        }
    }

    async fn record_statuses(
        &self,
        desired: &[Application],
        containers: &[ContainerSummary],
        report: &mut TickReport,
    ) {
        for app in desired {
            let name = app.container_name();
            let state = containers
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.status.clone())
                .unwrap_or_else(|| "missing".to_string());
            let stats = match self.engine.stats(&name).await {
                Ok(stats) => stats,
                Err(e) => {
                    debug!(id = %app.id, error = %e, "stats unavailable");
                    Default::default()
                }
            };
            let status = ApplicationStatus {
                cpu: stats.cpu,
                memory: stats.memory,
                state,
            };
            match self.store.set_application_status(&app.id, &status) {
                Ok(_) => report.statuses += 1,
                Err(e) => warn!(id = %app.id, error = %e, "cannot persist status"),
            }
        }
    }

    async fn record_system(&self, desired: &[Application]) {
        let snapshot = self.probe.snapshot().await;
        let info = system_info(&snapshot, self.config.reservation, desired);
        if let Err(e) = self.persist_system(&info) {
            warn!(error = %e, "cannot persist system snapshot");
        }
    }

    fn persist_system(&self, info: &SystemInfo) -> squall_state::StateResult<()> {
        if let Some(mut node) = self.store.get_node(&self.config.node_id)? {
            node.system = info.clone();
            self.store.put_node(&node)?;
        }
        if let Some(mut state) = self.store.get_client_state(&self.config.node_id)? {
            state.system = info.clone();
            state.applications = self
                .store
                .list_applications_for_node(&self.config.node_id)?;
            state.updated_at = epoch_secs();
            self.store.put_client_state(&state)?;
        }
        Ok(())
    }
}
