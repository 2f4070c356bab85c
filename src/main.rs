use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use clusterm_lite::api::{run_api, ApiState};
use clusterm_lite::config::{ApiConfig, EngineConfig, ManagerConfig};
use clusterm_lite::manager::Manager;
use clusterm_lite::shutdown::install_shutdown_handler;
use clusterm_lite::worker::engine::parse_extra_vars;

const JOB_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "clusterm-lite")]
#[command(version)]
#[command(about = "Cluster manager that commissions discovered nodes")]
struct Args {
    /// Address to bind the API server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Port for the API server
    #[arg(long, default_value = "9007")]
    port: u16,

    /// JSON file listing the nodes known at startup
    #[arg(long)]
    nodes_file: Option<PathBuf>,

    // === Configuration engine ===
    /// Program that runs playbooks
    #[arg(long, default_value = "ansible-playbook")]
    runner: String,

    /// Extra argument placed before the generated ones (repeatable)
    #[arg(long = "runner-arg")]
    runner_args: Vec<String>,

    /// Directory holding the playbooks
    #[arg(long, default_value = "/etc/clusterm/ansible")]
    playbook_dir: PathBuf,

    /// Playbook that configures hosts
    #[arg(long, default_value = "site.yml")]
    configure_playbook: String,

    /// Playbook that cleans hosts up after a failed configuration
    #[arg(long, default_value = "cleanup.yml")]
    cleanup_playbook: String,

    /// Remote user for host connections
    #[arg(long, default_value = "cluster-admin")]
    user: String,

    /// SSH private key for host connections
    #[arg(long)]
    private_key: Option<PathBuf>,

    /// Default extra variables (JSON object) passed to every playbook run
    #[arg(long, default_value = "")]
    extra_vars: String,

    /// Directory for generated inventory files
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Log lines retained per job
    #[arg(long, default_value = "10000")]
    max_job_log_lines: usize,
}

impl Args {
    fn into_config(self) -> Result<ManagerConfig, Box<dyn std::error::Error>> {
        let engine = EngineConfig {
            runner: self.runner,
            runner_args: self.runner_args,
            playbook_dir: self.playbook_dir,
            configure_playbook: self.configure_playbook,
            cleanup_playbook: self.cleanup_playbook,
            user: self.user,
            private_key: self.private_key,
            extra_vars: parse_extra_vars(&self.extra_vars)?,
            work_dir: self.work_dir.unwrap_or_else(std::env::temp_dir),
        };

        Ok(ManagerConfig {
            engine,
            api: ApiConfig {
                listen_addr: SocketAddr::new(self.bind, self.port),
            },
            nodes_file: self.nodes_file,
            max_job_log_lines: self.max_job_log_lines,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Args::parse().into_config()?;
    let listen_addr = config.api.listen_addr;
    tracing::info!(
        addr = %listen_addr,
        runner = %config.engine.runner,
        playbook_dir = %config.engine.playbook_dir.display(),
        "Starting clusterm-lite"
    );

    let manager = Manager::from_config(config).await?;
    let gate = manager.gate().clone();
    let shutdown = install_shutdown_handler(gate.clone());

    run_api(listen_addr, ApiState { manager }, shutdown).await;

    // Let a cancelled job run its completion callback before exiting.
    let drained = tokio::time::timeout(JOB_DRAIN_TIMEOUT, async {
        while gate.is_active() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Active job did not finish before shutdown");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
