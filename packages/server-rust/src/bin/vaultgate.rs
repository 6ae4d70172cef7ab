//! Gateway entry point: parse configuration, start the pool, serve HTTP,
//! and drain on Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};
use vaultgate_core::{AuthorizationGate, ResourceProvider};
use vaultgate_server::logging;
use vaultgate_server::network::{AppState, NetworkConfig, NetworkModule};
use vaultgate_server::{Manager, MemoryPolicyGate, MemoryResourceProvider, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "vaultgate", version, about = "Authorizing file gateway")]
struct Cli {
    /// Number of workers executing requests concurrently.
    #[arg(long, env = "VAULTGATE_WORKERS", default_value_t = 20)]
    workers: usize,

    /// Requests that may wait for a worker before submissions are rejected.
    #[arg(long, env = "VAULTGATE_QUEUE_CAPACITY", default_value_t = 2000)]
    queue_capacity: usize,

    #[arg(long, env = "VAULTGATE_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "VAULTGATE_PORT", default_value_t = 8088)]
    port: u16,

    /// How long an HTTP caller waits for its response, in milliseconds.
    #[arg(long, env = "VAULTGATE_REQUEST_TIMEOUT_MS", default_value_t = 10_000)]
    request_timeout_ms: u64,

    /// How long shutdown waits for busy workers, in milliseconds.
    #[arg(long, env = "VAULTGATE_SHUTDOWN_GRACE_MS", default_value_t = 5_000)]
    shutdown_grace_ms: u64,

    /// JSON policy file. Policy is kept in memory only when omitted.
    #[arg(long, env = "VAULTGATE_POLICY_FILE")]
    policy_file: Option<PathBuf>,

    /// Artificial latency added to every storage call, in milliseconds.
    #[arg(long, env = "VAULTGATE_STORAGE_LATENCY_MS", default_value_t = 0)]
    storage_latency_ms: u64,

    #[arg(long, env = "VAULTGATE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "VAULTGATE_LOG_JSON")]
    log_json: bool,

    /// Address for the Prometheus scrape endpoint. Metrics are not exported when omitted.
    #[arg(long, env = "VAULTGATE_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            worker_count: self.workers,
            queue_capacity: self.queue_capacity,
            request_timeout_ms: self.request_timeout_ms,
            shutdown_grace_ms: self.shutdown_grace_ms,
        }
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            // Leave room for the engine's own timeout response.
            request_timeout: Duration::from_millis(self.request_timeout_ms) + Duration::from_secs(5),
            ..NetworkConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_level = logging::init(&cli.log_level, cli.log_json)?;

    if let Some(addr) = cli.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("install Prometheus exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let gate: Arc<dyn AuthorizationGate> = match &cli.policy_file {
        Some(path) => Arc::new(MemoryPolicyGate::load(path)?),
        None => {
            warn!("no policy file configured, policy changes will not survive restart");
            Arc::new(MemoryPolicyGate::new())
        }
    };
    let provider: Arc<dyn ResourceProvider> = Arc::new(
        MemoryResourceProvider::new().with_latency(Duration::from_millis(cli.storage_latency_ms)),
    );

    let manager = Arc::new(Manager::start(cli.server_config(), gate, provider)?);

    let state = AppState::new(Arc::clone(&manager), cli.network_config(), log_level);
    let mut network = NetworkModule::new(state);
    network.start().await?;

    network
        .serve(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await?;

    let report = manager.shutdown().await;
    if !report.is_clean() {
        warn!(aborted = ?report.aborted, "workers aborted during shutdown");
    }
    info!(abandoned = report.abandoned, "gateway stopped");
    Ok(())
}
