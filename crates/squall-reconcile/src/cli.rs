//! `docker`/`podman` command-line engine.
//!
//! Each operation is one process invocation. Output formats are pinned with
//! `--format` templates and parsed here; nothing goes through a shell.

use std::process::Stdio;

use async_trait::async_trait;
use squall_state::Application;
use tokio::process::Command;
use tracing::debug;

use crate::engine::{
    ContainerEngine, ContainerStats, ContainerSummary, LABEL_APP, LABEL_DIGEST, MountBinding,
};
use crate::error::{EngineError, EngineResult};

const FIELD_SEPARATOR: &str = "||";

pub struct CliEngine {
    binary: String,
}

impl CliEngine {
    /// `binary` is `docker`, `podman`, or a path to either.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn is_podman(&self) -> bool {
        self.binary.ends_with("podman")
    }

    async fn exec(&self, args: &[String]) -> EngineResult<String> {
        let output = self.output(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(EngineError::Command {
                command: format!("{} {}", self.binary, args.join(" ")),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn output(&self, args: &[String]) -> EngineResult<std::process::Output> {
        debug!(binary = %self.binary, ?args, "engine command");
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EngineError::Spawn {
                binary: self.binary.clone(),
                reason: e.to_string(),
            })
    }
}

/// Arguments for `run` that start `app` detached with its limits.
pub fn run_args(app: &Application, mounts: &[MountBinding]) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        app.container_name(),
        "--hostname".to_string(),
        app.hostname.clone(),
        "--label".to_string(),
        format!("{LABEL_APP}={}", app.id),
        "--label".to_string(),
        format!("{LABEL_DIGEST}={}", app.digest()),
        format!("--cpus={}", app.cpu),
        format!("--memory={}b", app.memory),
    ];
    for (key, value) in &app.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    for (host, container) in &app.ports {
        args.push("-p".to_string());
        args.push(format!("{host}:{container}"));
    }
    for mount in mounts {
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}",
            mount.host_path.display(),
            mount.container_path
        ));
    }
    args.push(app.image.clone());
    args
}

/// Parse one `ps` line: `name||labels||state||status`.
pub fn parse_ps_line(line: &str) -> Option<ContainerSummary> {
    let mut fields = line.split(FIELD_SEPARATOR);
    let name = fields.next()?.trim().trim_start_matches('/').to_string();
    if name.is_empty() {
        return None;
    }
    let labels = fields.next().unwrap_or_default();
    let state = fields.next().unwrap_or_default().trim().to_lowercase();
    let status = fields.next().unwrap_or_default().trim().to_string();

    let label = |key: &str| {
        parse_labels(labels)
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .filter(|v| !v.is_empty())
    };
    Some(ContainerSummary {
        app_id: label(LABEL_APP),
        digest: label(LABEL_DIGEST),
        running: state == "running",
        status,
        name,
    })
}

/// Docker prints labels as `k=v,k=v`; podman as `map[k:v k:v]`.
fn parse_labels(raw: &str) -> Vec<(String, String)> {
    let raw = raw.trim();
    if let Some(inner) = raw.strip_prefix("map[").and_then(|r| r.strip_suffix(']')) {
        inner
            .split_whitespace()
            .filter_map(|pair| pair.split_once(':'))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    } else {
        raw.split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect()
    }
}

/// Parse `stats` output: `12.34%||5.67%`.
pub fn parse_stats(output: &str) -> EngineResult<ContainerStats> {
    let line = output
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| EngineError::Parse("empty stats output".to_string()))?;
    let (cpu, memory) = line
        .split_once(FIELD_SEPARATOR)
        .ok_or_else(|| EngineError::Parse(format!("stats line {line:?}")))?;
    let percent = |raw: &str| {
        raw.trim()
            .trim_end_matches('%')
            .parse::<f64>()
            .map_err(|e| EngineError::Parse(format!("percentage {raw:?}: {e}")))
    };
    Ok(ContainerStats {
        cpu: percent(cpu)?,
        memory: percent(memory)?,
    })
}

#[async_trait]
impl ContainerEngine for CliEngine {
    async fn list(&self) -> EngineResult<Vec<ContainerSummary>> {
        let mut args = vec!["ps".to_string(), "--all".to_string()];
        if !self.is_podman() {
            args.push("--no-trunc".to_string());
        }
        args.push("--format".to_string());
        args.push("{{.Names}}||{{.Labels}}||{{.State}}||{{.Status}}".to_string());

        let output = self.exec(&args).await?;
        Ok(output.lines().filter_map(parse_ps_line).collect())
    }

    async fn run(&self, app: &Application, mounts: &[MountBinding]) -> EngineResult<()> {
        self.exec(&run_args(app, mounts)).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> EngineResult<()> {
        self.exec(&["rm".to_string(), "-f".to_string(), name.to_string()])
            .await?;
        Ok(())
    }

    async fn stats(&self, name: &str) -> EngineResult<ContainerStats> {
        let output = self
            .exec(&[
                "stats".to_string(),
                name.to_string(),
                "--no-stream".to_string(),
                "--format".to_string(),
                "{{.CPUPerc}}||{{.MemPerc}}".to_string(),
            ])
            .await?;
        parse_stats(&output)
    }

    async fn logs(&self, name: &str) -> EngineResult<String> {
        let args = ["logs".to_string(), name.to_string()];
        let output = self.output(&args).await?;
        if !output.status.success() {
            return Err(EngineError::Command {
                command: format!("{} logs {name}", self.binary),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        // Containers write to both streams; the engine replays each on its own.
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use squall_state::ApplicationStatus;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn sample_app() -> Application {
        Application {
            id: "4f1c".to_string(),
            node: "n1".to_string(),
            name: "web".to_string(),
            image: "nginx:1.27".to_string(),
            hostname: "web".to_string(),
            namespace: "default".to_string(),
            env: BTreeMap::from([("MODE".to_string(), "prod".to_string())]),
            ports: BTreeMap::from([(8080, 80)]),
            mounts: BTreeMap::new(),
            cpu: 0.5,
            memory: 536_870_912,
            revision: 2,
            status: ApplicationStatus::default(),
        }
    }

    #[test]
    fn run_args_carry_limits_env_ports_and_mounts() {
        let app = sample_app();
        let mounts = vec![MountBinding {
            host_path: PathBuf::from("/srv/squall/4f1c/data"),
            container_path: "/data".to_string(),
        }];
        let args = run_args(&app, &mounts);

        assert_eq!(&args[..4], &["run", "-d", "--name", "squall-web"]);
        assert!(args.contains(&"--cpus=0.5".to_string()));
        assert!(args.contains(&"--memory=536870912b".to_string()));
        assert!(args.contains(&"MODE=prod".to_string()));
        assert!(args.contains(&"8080:80".to_string()));
        assert!(args.contains(&"/srv/squall/4f1c/data:/data".to_string()));
        assert!(args.contains(&format!("squall.digest={}", app.digest())));
        assert_eq!(args.last().unwrap(), "nginx:1.27");
    }

    #[test]
    fn parses_docker_ps_line() {
        let line = "squall-web||maintainer=x,squall.app=4f1c,squall.digest=abc||running||Up 3 minutes";
        let summary = parse_ps_line(line).unwrap();
        assert_eq!(summary.name, "squall-web");
        assert_eq!(summary.app_id.as_deref(), Some("4f1c"));
        assert_eq!(summary.digest.as_deref(), Some("abc"));
        assert!(summary.running);
        assert_eq!(summary.status, "Up 3 minutes");
    }

    #[test]
    fn parses_podman_ps_line() {
        let line = "squall-web||map[squall.app:4f1c squall.digest:abc]||exited||Exited (0) 2 seconds ago";
        let summary = parse_ps_line(line).unwrap();
        assert_eq!(summary.app_id.as_deref(), Some("4f1c"));
        assert!(!summary.running);
    }

    #[test]
    fn unlabelled_container_is_unmanaged() {
        let summary = parse_ps_line("registry||||running||Up 2 days").unwrap();
        assert!(summary.app_id.is_none());
        assert!(parse_ps_line("").is_none());
    }

    #[test]
    fn parses_stats() {
        let stats = parse_stats("0.25%||12.50%\n").unwrap();
        assert_eq!(stats.cpu, 0.25);
        assert_eq!(stats.memory, 12.5);
        assert!(parse_stats("garbage").is_err());
        assert!(parse_stats("").is_err());
    }
}
