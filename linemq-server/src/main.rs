use anyhow::Result;
use clap::{Parser, Subcommand};
use linemq_server::{
    CommandEngine, NodeConfig, ReplicaNode, ReplicationMaster, Sentinel, server,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "linemq-server", version, about = "minimal distributed message broker")]
struct Cli {
    /// YAML configuration file; defaults apply for anything omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Serve clients, persist the command log, ship it to replicas.
    Master {
        #[arg(long)]
        client_addr: Option<SocketAddr>,
        #[arg(long)]
        replication_addr: Option<SocketAddr>,
        #[arg(long)]
        log_path: Option<PathBuf>,
    },
    /// Follow a master's log stream and answer health probes.
    Replica {
        #[arg(long)]
        master_addr: Option<SocketAddr>,
        #[arg(long)]
        health_addr: Option<SocketAddr>,
        #[arg(long)]
        log_path: Option<PathBuf>,
    },
    /// Watch master liveness and elect a promotion candidate.
    Sentinel {
        #[arg(long)]
        master_addr: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    info!("starting linemq-server v{}", env!("CARGO_PKG_VERSION"));

    match cli.role {
        Role::Master {
            client_addr,
            replication_addr,
            log_path,
        } => {
            if let Some(addr) = client_addr {
                config.master.client_address = addr;
            }
            if let Some(addr) = replication_addr {
                config.master.replication.listen_address = addr;
            }
            if let Some(path) = log_path {
                config.master.log_path = path;
            }
            run_master(config).await
        }
        Role::Replica {
            master_addr,
            health_addr,
            log_path,
        } => {
            if let Some(addr) = master_addr {
                config.replica.replication.master_address = addr;
            }
            if let Some(addr) = health_addr {
                config.replica.health_address = addr;
            }
            if let Some(path) = log_path {
                config.replica.log_path = path;
            }
            run_replica(config).await
        }
        Role::Sentinel { master_addr } => {
            if let Some(addr) = master_addr {
                config.sentinel.master_address = addr;
            }
            run_sentinel(config).await
        }
    }
}

async fn run_master(config: NodeConfig) -> Result<()> {
    let engine = Arc::new(CommandEngine::open(&config.master.log_path).await?);

    let master =
        ReplicationMaster::start(config.master.replication.clone(), Arc::clone(engine.log()))
            .await?;
    info!(replication = %master.local_addr(), "replication port ready");

    let listener = TcpListener::bind(config.master.client_address).await?;
    info!(clients = %listener.local_addr()?, "master serving clients");
    server::serve_clients(listener, engine).await;
    Ok(())
}

async fn run_replica(config: NodeConfig) -> Result<()> {
    let engine = Arc::new(CommandEngine::open(&config.replica.log_path).await?);

    let _replica = ReplicaNode::start(config.replica.replication.clone(), Arc::clone(&engine));

    let listener = TcpListener::bind(config.replica.health_address).await?;
    info!(health = %listener.local_addr()?, "replica answering health probes");
    server::serve_health(listener).await;
    Ok(())
}

async fn run_sentinel(config: NodeConfig) -> Result<()> {
    let sentinel = Sentinel::new(config.sentinel.clone());
    info!(
        master = %config.sentinel.master_address,
        candidates = config.sentinel.candidates.len(),
        "sentinel watching master"
    );
    sentinel.run().await;
    Ok(())
}
