//! squall.toml configuration.
//!
//! Every field has a default, so an empty (or missing) file is a valid
//! configuration. Command-line flags override what the file says.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};
use squall_cluster::ProbePolicy;
use squall_reconcile::Reservation;

pub const DEFAULT_PORT: u16 = 6626;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address peers and operators use to reach this daemon.
    pub host: String,
    pub port: u16,
    /// Interface the API listens on.
    pub bind_address: IpAddr,
    pub data_dir: PathBuf,
    /// `docker` or `podman`.
    pub container_engine: String,
    pub reserved_cpu_fraction: f64,
    pub reserved_memory_fraction: f64,
    /// Sources allowed on `/auth/join` and `/auth/api`.
    pub allowed_ips: Vec<IpAddr>,
    pub reconcile_interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub probe_attempts: u32,
    pub probe_delay_ms: u64,
    pub token_ttl_secs: u64,
    /// Containers the reconciler never destroys.
    pub infrastructure_containers: Vec<String>,
    pub log_format: LogFormat,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            bind_address: IpAddr::from([0, 0, 0, 0]),
            data_dir: PathBuf::from("/var/lib/squall"),
            container_engine: "docker".to_string(),
            reserved_cpu_fraction: 0.25,
            reserved_memory_fraction: 0.25,
            allowed_ips: vec![
                IpAddr::from([127, 0, 0, 1]),
                IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 1]),
            ],
            reconcile_interval_secs: 10,
            health_check_interval_secs: 10,
            probe_attempts: 3,
            probe_delay_ms: 1000,
            token_ttl_secs: squall_auth::DEFAULT_TOKEN_TTL_SECS,
            infrastructure_containers: Vec::new(),
            log_format: LogFormat::Text,
        }
    }
}

/// Flags shared by both modes; each one overrides the file.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Advertised host.
    #[arg(long)]
    pub host: Option<String>,

    /// API port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Data directory for the store, credentials and volumes.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Container engine binary (`docker` or `podman`).
    #[arg(long)]
    pub engine: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    pub json_logs: bool,
}

impl DaemonConfig {
    /// Read `path`, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
                Self::parse(&content)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(dir) = overrides.data_dir {
            self.data_dir = dir;
        }
        if let Some(engine) = overrides.engine {
            self.container_engine = engine;
        }
        if overrides.json_logs {
            self.log_format = LogFormat::Json;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (name, fraction) in [
            ("reserved_cpu_fraction", self.reserved_cpu_fraction),
            ("reserved_memory_fraction", self.reserved_memory_fraction),
        ] {
            if !(0.0..1.0).contains(&fraction) {
                anyhow::bail!("{name} must be in [0, 1), got {fraction}");
            }
        }
        if self.reconcile_interval_secs == 0 || self.health_check_interval_secs == 0 {
            anyhow::bail!("intervals must be at least one second");
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("squall.redb")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("auth.json")
    }

    pub fn volume_root(&self) -> PathBuf {
        self.data_dir.join("volumes")
    }

    pub fn reservation(&self) -> Reservation {
        Reservation {
            cpu_fraction: self.reserved_cpu_fraction,
            memory_fraction: self.reserved_memory_fraction,
        }
    }

    pub fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            attempts: self.probe_attempts,
            delay: Duration::from_millis(self.probe_delay_ms),
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(DaemonConfig::parse("").unwrap(), DaemonConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = DaemonConfig::parse(
            r#"
            host = "10.0.0.4"
            container_engine = "podman"
            allowed_ips = ["127.0.0.1", "10.0.0.1"]
            infrastructure_containers = ["registry"]
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "10.0.0.4");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.container_engine, "podman");
        assert_eq!(config.allowed_ips.len(), 2);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.probe_policy(), ProbePolicy::default());
    }

    #[test]
    fn rejects_full_reservation() {
        assert!(DaemonConfig::parse("reserved_cpu_fraction = 1.0").is_err());
        assert!(DaemonConfig::parse("reconcile_interval_secs = 0").is_err());
    }

    #[test]
    fn flags_override_file() {
        let mut config = DaemonConfig::parse("port = 7000").unwrap();
        config.apply(Overrides {
            port: Some(7100),
            data_dir: Some(PathBuf::from("/tmp/squall")),
            json_logs: true,
            ..Overrides::default()
        });
        assert_eq!(config.port, 7100);
        assert_eq!(config.credentials_path(), PathBuf::from("/tmp/squall/auth.json"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.host, "127.0.0.1");
    }
}
