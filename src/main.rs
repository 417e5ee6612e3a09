//! WolfElect - Leader Election over a Publish/Subscribe Bus
//!
//! Runs election nodes, the TCP bus broker, and a few operator commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfelect::api::HttpServer;
use wolfelect::bus::{MemoryBus, MessageBus, RedisBus};
use wolfelect::config::{BusKind, LoggingConfig, WolfElectConfig, SAMPLE_CONFIG};
use wolfelect::error::{Error, Result};
use wolfelect::id::NodeId;
use wolfelect::network::{BrokerServer, TcpBus};
use wolfelect::node::{ElectionHandle, ElectionNode, NodeOptions};

/// WolfElect - heartbeat and majority-vote leader election
#[derive(Parser)]
#[command(name = "wolfelect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfelect.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an election node
    Start {
        /// Node ID (UUID v4); generated when omitted
        #[arg(long)]
        node_id: Option<String>,
    },

    /// Start the TCP bus broker
    Broker {
        /// Address to listen on (defaults to bus.broker_address)
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Run several nodes on an in-memory bus and report the outcome
    Simulate {
        /// Number of nodes
        #[arg(short, long, default_value_t = 3)]
        nodes: usize,

        /// How long to let the cluster run, in seconds
        #[arg(short, long, default_value_t = 10)]
        seconds: u64,

        /// Stop the leader halfway through
        #[arg(long)]
        failover: bool,
    },

    /// Query a node's election status
    Status {
        /// Node API address to query
        #[arg(short, long, default_value = "localhost:8090")]
        address: String,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfelect.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file when it is readable
    let logging = WolfElectConfig::from_file(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or_else(|| logging.level.clone());
    init_logging(&level, &logging);

    match cli.command {
        Commands::Start { node_id } => run_start(&cli.config, node_id).await,
        Commands::Broker { listen } => run_broker(&cli.config, listen).await,
        Commands::Simulate {
            nodes,
            seconds,
            failover,
        } => run_simulate(&cli.config, nodes, seconds, failover).await,
        Commands::Status { address } => run_status(address).await,
        Commands::Init { output } => run_init(output),
        Commands::Validate => run_validate(&cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str, logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Load the config file, falling back to defaults when the default file is absent
fn load_config(path: &Path) -> Result<WolfElectConfig> {
    if !path.exists() && path == WolfElectConfig::default_path() {
        tracing::info!("No configuration at {:?}, using defaults", path);
        return Ok(WolfElectConfig::default());
    }

    match WolfElectConfig::from_file(path) {
        Ok(config) => Ok(config),
        Err(e) => {
            tracing::error!("Failed to load configuration from {:?}: {}", path, e);
            Err(e)
        }
    }
}

/// Start an election node
async fn run_start(config_path: &Path, node_id: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;

    let node_id = match node_id {
        Some(id) => NodeId::parse(&id)?,
        None => NodeId::generate(),
    };
    tracing::info!("Starting WolfElect node {}", node_id);

    let bus: Arc<dyn MessageBus> = match config.bus.kind {
        BusKind::Tcp => {
            tracing::info!("Using bus broker at {}", config.bus.broker_address);
            Arc::new(TcpBus::new(
                config.bus.broker_address.clone(),
                config.connect_timeout(),
            ))
        }
        BusKind::Redis => {
            tracing::info!("Using Redis bus, database {}", config.bus.db);
            Arc::new(
                RedisBus::connect(&config.bus.url, config.bus.db, config.connect_timeout()).await?,
            )
        }
        BusKind::Memory => {
            tracing::warn!("Memory bus only reaches nodes in this process");
            Arc::new(MemoryBus::new())
        }
    };

    let (handle, mut join) =
        ElectionNode::spawn(node_id, bus, NodeOptions::from_config(&config)).await?;

    let http_server = HttpServer::new(config.api.clone(), handle.clone());
    tokio::spawn(async move {
        if let Err(e) = http_server.start().await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = &mut join => {
            tracing::warn!("Election node exited");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            let _ = handle.shutdown().await;
            let _ = join.await;
        }
    }

    Ok(())
}

/// Start the TCP bus broker
async fn run_broker(config_path: &Path, listen: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    let address = listen.unwrap_or_else(|| config.bus.broker_address.clone());

    let broker = Arc::new(BrokerServer::new(address));
    let server = Arc::clone(&broker);

    tokio::select! {
        result = server.start() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            broker.stop();
            Ok(())
        }
    }
}

/// Run a cluster on an in-memory bus
async fn run_simulate(config_path: &Path, nodes: usize, seconds: u64, failover: bool) -> Result<()> {
    if nodes == 0 {
        return Err(Error::Config("simulate needs at least one node".into()));
    }

    let config = load_config(config_path)?;
    let options = NodeOptions::from_config(&config);
    let bus = MemoryBus::new();

    let mut handles: Vec<ElectionHandle> = Vec::with_capacity(nodes);
    for _ in 0..nodes {
        let (handle, _join) =
            ElectionNode::spawn(NodeId::generate(), Arc::new(bus.clone()), options.clone()).await?;
        handles.push(handle);
    }
    println!("Started {} nodes on prefix {:?}", nodes, options.channels.prefix());

    let run_for = Duration::from_secs(seconds);
    if failover {
        tokio::time::sleep(run_for / 2).await;
        print_statuses(&handles);

        let leader = handles.iter().find(|h| h.is_leader()).cloned();
        if let Some(leader) = leader {
            println!("\nStopping leader {}", leader.node_id());
            leader.shutdown().await?;
            handles.retain(|h| h.node_id() != leader.node_id());
        } else {
            println!("\nNo leader to stop");
        }

        tokio::time::sleep(run_for / 2).await;
    } else {
        tokio::time::sleep(run_for).await;
    }

    print_statuses(&handles);

    for handle in &handles {
        let _ = handle.shutdown().await;
    }

    Ok(())
}

fn print_statuses(handles: &[ElectionHandle]) {
    println!();
    println!("{:<38} {:<10} {:<6} {:<9} {:<38}", "NODE", "ROLE", "PEERS", "MAJORITY", "LEADER");
    for handle in handles {
        let status = handle.status();
        let leader = status
            .leader_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<10} {:<6} {:<9} {:<38}",
            status.node_id.to_string(),
            status.role.to_string(),
            status.active_network_size,
            status.majority_required_size,
            leader
        );
    }
}

/// Query a node's election status
async fn run_status(address: String) -> Result<()> {
    let url = format!("http://{}/status", address);

    match reqwest::get(&url).await {
        Ok(response) => {
            let status: serde_json::Value = response
                .json()
                .await
                .map_err(|e| Error::Network(e.to_string()))?;
            let pretty = serde_json::to_string_pretty(&status)
                .map_err(|e| Error::Internal(e.to_string()))?;
            println!("{}", pretty);
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to get status: {}", e);
            Err(Error::Network(e.to_string()))
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf) -> Result<()> {
    std::fs::write(&output, SAMPLE_CONFIG)?;
    println!("Configuration file created: {}", output.display());
    println!("\nStart a broker with: wolfelect broker --config {}", output.display());
    println!("Then start nodes with: wolfelect start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: &Path) -> Result<()> {
    match WolfElectConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            let endpoint = match config.bus.kind {
                BusKind::Tcp => config.bus.broker_address.clone(),
                BusKind::Redis => format!("{} db {}", config.bus.url, config.bus.db),
                BusKind::Memory => "in-process".to_string(),
            };
            println!("  Bus:            {:?} ({})", config.bus.kind, endpoint);
            println!("  Channel Prefix: {}", config.bus.prefix);
            println!("  Heartbeat:      {} ms", config.election.heartbeat_interval_ms);
            println!(
                "  Leader Check:   {:?} - {:?}",
                config.election.leader_check_min(),
                config.election.leader_check_max()
            );
            println!("  API:            {}", config.api.bind_address);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
