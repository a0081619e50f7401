//! L2 Liquid Staking Node
//!
//! Runs the L1 and L2 staking engines side by side, relays messages between
//! them in both directions and serves JSON-RPC. Each engine's state is
//! persisted to its own directory and survives restarts.

use anyhow::Result;
use clap::Parser;
use message_bridge::{AttestationVerifier, Attester, Relayer, RelayerConfig};
use rpc_server::{HttpRpcServer, RpcContext};
use stake_engine::{DomainEngine, EnginePersistence, PersistentStore};
use stake_types::Domain;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::NodeConfig;

/// L2 liquid staking node
#[derive(Parser, Debug)]
#[command(name = "l2-stake")]
#[command(about = "Liquid staking core bridging an L2 to L1 validators", long_about = None)]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP RPC bind address (overrides config)
    #[arg(long)]
    rpc_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Data directory for persistent state (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Save state every N blocks (overrides config, 0 = only on shutdown)
    #[arg(long)]
    save_interval: Option<u64>,
}

/// One domain's engine with its store
struct DomainNode {
    engine: Arc<DomainEngine>,
    store: PersistentStore,
}

impl DomainNode {
    fn save(&self) {
        if let Err(e) = self.engine.save_to_disk(&self.store) {
            tracing::error!("Failed to save {} state: {}", self.engine.domain(), e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(addr) = args.rpc_addr.clone() {
        config.rpc_addr = addr;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(interval) = args.save_interval {
        config.save_interval = interval;
    }

    run(config).await
}

async fn run(config: NodeConfig) -> Result<()> {
    tracing::info!("Starting L2 liquid staking node");
    tracing::info!("  HTTP RPC: {}", config.rpc_addr);
    tracing::info!("  Block time: {}ms", config.block_time_ms);
    tracing::info!("  Data directory: {:?}", config.data_dir);
    tracing::info!("  Save interval: {} blocks", config.save_interval);

    let roles = Arc::new(config.role_store()?);
    let operators = Arc::new(config.operator_directory()?);
    let l1_attester = Attester::new(Domain::L1, config.attester_key(Domain::L1)?);
    let l2_attester = Attester::new(Domain::L2, config.attester_key(Domain::L2)?);
    let verifier = Arc::new(
        AttestationVerifier::new()
            .with_key(Domain::L1, l1_attester.verifying_key())
            .with_key(Domain::L2, l2_attester.verifying_key()),
    );

    let mut nodes = Vec::with_capacity(2);
    for domain in [Domain::L1, Domain::L2] {
        let engine = Arc::new(DomainEngine::new(
            domain,
            config.protocol(domain).clone(),
            roles.clone(),
            verifier.clone(),
            operators.clone(),
        )?);

        let dir = config.data_dir.join(domain.to_string().to_lowercase());
        std::fs::create_dir_all(&dir)?;
        let store = PersistentStore::open(&dir)?;

        // Load existing state from disk
        let loaded = engine.load_from_disk(&store)?;
        if loaded == 0 {
            tracing::info!("No existing {} state found, starting fresh", domain);
        } else {
            tracing::info!("{} resumed at height {}", domain, engine.height());
        }
        nodes.push(DomainNode { engine, store });
    }
    let nodes = Arc::new(nodes);
    let (l1, l2) = (nodes[0].engine.clone(), nodes[1].engine.clone());

    // Relayers, one per direction
    let relayer_config = RelayerConfig {
        retry_interval_ms: config.relay_retry_ms,
    };
    let to_l2 = Arc::new(Relayer::new(
        l1.clone(),
        l2.clone(),
        l1_attester,
        relayer_config.clone(),
    ));
    let to_l1 = Arc::new(Relayer::new(l2.clone(), l1.clone(), l2_attester, relayer_config));
    let relay_handles = [tokio::spawn(to_l2.run()), tokio::spawn(to_l1.run())];

    // Local block ticker with periodic saves
    let ticker_nodes = nodes.clone();
    let block_time = Duration::from_millis(config.block_time_ms.max(1));
    let save_interval = config.save_interval;
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(block_time);
        loop {
            interval.tick().await;
            for node in ticker_nodes.iter() {
                let height = node.engine.advance_height();
                if save_interval > 0 && height % save_interval == 0 {
                    node.save();
                }
            }
        }
    });

    // Start HTTP RPC server
    let http_context = Arc::new(RpcContext::new(l1.clone(), l2.clone()));
    let http_addr = config.rpc_addr.clone();
    let http_server = tokio::spawn(async move {
        let server = HttpRpcServer::new(http_context);
        if let Err(e) = server.run(&http_addr).await {
            tracing::error!("HTTP RPC server error: {}", e);
        }
    });

    tracing::info!("Node running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    ticker.abort();
    http_server.abort();
    for handle in relay_handles {
        handle.abort();
    }

    // Save state before shutdown
    for node in nodes.iter() {
        tracing::info!(
            "Saving final {} state at height {}...",
            node.engine.domain(),
            node.engine.height()
        );
        node.save();
    }

    tracing::info!("Node stopped");

    Ok(())
}
