//! squalld — the Squall daemon.
//!
//! One binary, two modes:
//! - `leader` owns the schedule, the credentials and the membership
//! - `follower` joins a leader and runs whatever is assigned to it
//!
//! # Usage
//!
//! ```text
//! squalld leader --data-dir /var/lib/squall
//! squalld follower --leader 10.0.0.1:6626 --join-token <token>
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use squall_reconcile::{CliEngine, ContainerEngine, HostProbe, SystemProbe};
use squalld::{DaemonConfig, FollowerDaemon, LeaderDaemon, Overrides, telemetry};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "squalld", about = "Squall cluster daemon")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run as the cluster leader.
    Leader {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Join an existing leader.
    Follower {
        /// Leader address as `host:port`.
        #[arg(long)]
        leader: String,

        /// Join token from `GET /auth/join` on the leader.
        /// Without one, persisted credentials are reused.
        #[arg(long)]
        join_token: Option<String>,

        #[command(flatten)]
        overrides: Overrides,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Leader { overrides } => {
            config.apply(overrides);
            telemetry::init(config.log_format);
            let (listener, engine, probe) = prepare(&config).await?;
            info!("squall daemon starting in leader mode");
            LeaderDaemon::bootstrap(config, engine, probe)
                .await?
                .serve(listener, shutdown_signal())
                .await
        }
        Command::Follower {
            leader,
            join_token,
            overrides,
        } => {
            config.apply(overrides);
            telemetry::init(config.log_format);
            let (listener, engine, probe) = prepare(&config).await?;
            info!(%leader, "squall daemon starting in follower mode");
            FollowerDaemon::bootstrap(config, leader, join_token, engine, probe)
                .await?
                .run(listener, shutdown_signal(), None)
                .await
        }
    }
}

async fn prepare(
    config: &DaemonConfig,
) -> anyhow::Result<(TcpListener, Arc<dyn ContainerEngine>, Arc<dyn SystemProbe>)> {
    let listener = TcpListener::bind((config.bind_address, config.port)).await?;
    let engine: Arc<dyn ContainerEngine> = Arc::new(CliEngine::new(config.container_engine.clone()));
    let probe: Arc<dyn SystemProbe> = Arc::new(HostProbe::new());
    info!(engine = %config.container_engine, "container engine selected");
    Ok((listener, engine, probe))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
