use anyhow::{Context, Result};
use clap::Parser;
use partlink_payload::{ExchangePattern, Lifecycle, Node, NodeConfig, RunMode};
use partlink_protocol::Endpoint;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "partlink-payload", about = "partlink payload: rendezvous with the supervisor and message peers")]
struct Cli {
    /// Supervisor host
    #[arg(long, default_value = "127.0.0.1", env = "PARTLINK_SUPERVISOR_HOST")]
    supervisor_host: String,

    /// Supervisor port
    #[arg(long, env = "PARTLINK_SUPERVISOR_PORT")]
    supervisor_port: u16,

    /// Host to bind the payload server on (defaults to the supervisor host)
    #[arg(long, env = "PARTLINK_BIND_HOST")]
    bind_host: Option<String>,

    /// Local payload id, in [0, partitions)
    #[arg(long, env = "PARTLINK_ID")]
    id: u32,

    /// Total number of payloads in the partition set, including this one
    #[arg(long, env = "PARTLINK_PARTITIONS")]
    partitions: u32,

    /// Delay between two peer exchanges, in milliseconds
    #[arg(long, default_value = "5000")]
    interval_ms: u64,

    /// Number of exchanges before reporting inactive
    #[arg(long, default_value = "3")]
    exchanges: u64,

    /// Ignore --exchanges and keep messaging until terminated
    #[arg(long, default_value = "false")]
    until_terminated: bool,

    /// Address every exchange to all peers instead of one random peer
    #[arg(long, default_value = "false")]
    broadcast: bool,

    /// Timeout for every outbound call, in seconds
    #[arg(long, default_value = "10")]
    rpc_timeout_secs: u64,
}

impl Cli {
    fn into_config(self) -> Result<NodeConfig, partlink_payload::NodeError> {
        let supervisor = Endpoint::new(self.supervisor_host, self.supervisor_port);
        let mut cfg = NodeConfig::new(self.id, self.partitions, supervisor)?
            .with_interval(Duration::from_millis(self.interval_ms))
            .with_rpc_timeout(Duration::from_secs(self.rpc_timeout_secs))
            .with_run_mode(if self.until_terminated {
                RunMode::UntilTerminated
            } else {
                RunMode::Bounded(self.exchanges)
            })
            .with_pattern(if self.broadcast {
                ExchangePattern::Broadcast
            } else {
                ExchangePattern::RandomPeer
            });
        if let Some(host) = self.bind_host {
            cfg = cfg.with_bind_host(host);
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!(args = ?std::env::args().skip(1).collect::<Vec<_>>(), "Command line");
    let cfg = Cli::parse().into_config().context("Invalid payload configuration")?;
    tracing::info!(
        id = cfg.local_id(),
        partitions = cfg.identity.partition_count,
        supervisor = %cfg.supervisor,
        mode = ?cfg.run_mode,
        pattern = ?cfg.pattern,
        "Starting partlink payload"
    );

    let node = Node::bind(cfg).await.context("Failed to bind payload server")?;

    // Spawn shutdown listener
    let lifecycle = node.lifecycle();
    tokio::spawn(async move {
        shutdown_signal(&lifecycle).await;
    });

    let report = node.run().await.context("Payload failed")?;
    tracing::info!(?report, "Payload shut down");
    Ok(())
}

/// SIGINT / SIGTERM take the same path as a `Terminate` call
async fn shutdown_signal(lifecycle: &Arc<Lifecycle>) {
    let ctrl_c = async { signal::ctrl_c().await.ok(); };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
        _ = lifecycle.termination().wait() => return,
    }
    lifecycle.terminate();
}
