//! The container engine contract.

use std::path::PathBuf;

use async_trait::async_trait;
use squall_state::Application;

use crate::error::EngineResult;

/// Label holding the application id on managed containers.
pub const LABEL_APP: &str = "squall.app";

/// Label holding [`Application::digest`] of the deployed spec.
pub const LABEL_DIGEST: &str = "squall.digest";

/// One container as listed by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSummary {
    pub name: String,
    /// `None` for containers this daemon did not create.
    pub app_id: Option<String>,
    pub digest: Option<String>,
    pub running: bool,
    /// Human-readable status, e.g. `Up 5 minutes`.
    pub status: String,
}

/// Point-in-time usage of one container, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContainerStats {
    pub cpu: f64,
    pub memory: f64,
}

/// A host directory bind-mounted into a container.
#[derive(Debug, Clone, PartialEq)]
pub struct MountBinding {
    pub host_path: PathBuf,
    pub container_path: String,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Every container on the host, running or not.
    async fn list(&self) -> EngineResult<Vec<ContainerSummary>>;

    /// Start a container for `app` with its limits, env, ports and mounts.
    async fn run(&self, app: &Application, mounts: &[MountBinding]) -> EngineResult<()>;

    /// Stop and remove a container by name.
    async fn remove(&self, name: &str) -> EngineResult<()>;

    async fn stats(&self, name: &str) -> EngineResult<ContainerStats>;

    async fn logs(&self, name: &str) -> EngineResult<String>;
}
