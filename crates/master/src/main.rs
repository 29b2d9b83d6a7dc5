use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use master::config::{ClusterConfig, DbConfig, MasterConfig};
use master::stub::{StubNetwork, StubRootState};
use master::{logging, Master};

/// Master coordinator for a sharded blockchain cluster: brings the
/// configured slaves up, maintains the root chain, and dispatches mining
/// work and client/peer traffic across them.
#[derive(Debug, Parser)]
#[command(name = "quarkchain-master", about)]
struct Cli {
    /// P2P listen port.
    #[arg(long, default_value_t = 38291)]
    server_port: u16,

    /// Enables the JSON-RPC front end.
    #[arg(long, action(clap::ArgAction::SetTrue))]
    enable_local_server: bool,

    /// JSON-RPC port.
    #[arg(long, default_value_t = 38391)]
    local_port: u16,

    /// Bootstrap peer host.
    #[arg(long, default_value = "")]
    seed_host: String,

    /// Bootstrap peer port.
    #[arg(long, default_value_t = 0)]
    seed_port: u16,

    /// Intra-cluster RPC port.
    #[arg(long, default_value_t = 38491)]
    node_port: u16,

    /// Path to the cluster configuration JSON document.
    #[arg(long)]
    cluster_config: PathBuf,

    /// Use an in-memory backing store instead of a persistent one.
    #[arg(long, action(clap::ArgAction::SetTrue))]
    in_memory_db: bool,

    /// Filesystem path for the persistent backing store. Wiped clean on
    /// every start.
    #[arg(long, default_value = "./master-db")]
    db_path: PathBuf,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::install(&cli.log_level);

    let cluster = ClusterConfig::load(&cli.cluster_config)?;

    let db = if cli.in_memory_db {
        DbConfig::InMemory
    } else {
        // Storage itself belongs to the root-state collaborator, out of
        // scope here; the Master only owns the flag plumbing and the
        // "wipe clean on start" contract for the persistent variant.
        if cli.db_path.exists() {
            std::fs::remove_dir_all(&cli.db_path)?;
        }
        std::fs::create_dir_all(&cli.db_path)?;
        DbConfig::Persistent {
            path: cli.db_path.clone(),
        }
    };

    let config = MasterConfig {
        server_port: cli.server_port,
        enable_local_server: cli.enable_local_server,
        local_port: cli.local_port,
        seed_host: cli.seed_host,
        seed_port: cli.seed_port,
        node_port: cli.node_port,
        db,
        ..MasterConfig::default()
    };

    let root_state = Arc::new(StubRootState::new());
    let network = Arc::new(StubNetwork);

    let master = Master::new(config, cluster, root_state, network);
    master.start();

    match master.wait_until_ready().await {
        Ok(()) => tracing::info!("cluster active"),
        Err(err) => tracing::error!(%err, "cluster failed to become ready"),
    }

    master.wait_for_shutdown().await;
    tracing::info!("master shut down");
    Ok(())
}
