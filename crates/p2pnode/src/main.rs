#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use bitcoin::BlockHash;
use blockchain_p2p::{
    Chain, Collaborators, Config, PeerManager, StoragePolicy,
    client::{JobOutput, oracle::MemoryHeaderOracle},
};
use clap::{Parser, ValueEnum};
use tracing::{Level, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoUtc};

#[derive(Parser)]
#[command(name = "p2pnode")]
#[command(about = "Runs a blockchain peer manager and keeps it connected until interrupted.", long_about = None)]
struct Args {
    /// Chain to join (bitcoin, bitcoin_testnet3, bitcoin_cash, litecoin, unit_test, ...).
    #[arg(long, default_value = "bitcoin_testnet3")]
    chain: Chain,

    /// Load the configuration from a JSON file instead of the flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Connect to specific peers.
    #[arg(short = 'c', long = "connect")]
    connect: Vec<SocketAddr>,

    /// Listen for incoming connections on the specified address/port.
    #[arg(short = 'l', long = "listen")]
    listen: Vec<SocketAddr>,

    /// Seed node host name, resolved on the first housekeeping tick.
    #[arg(long)]
    seed: Option<String>,

    /// Storage policy driving the peer target (all, cache, none).
    #[arg(long, default_value = "none", value_parser = parse_storage_policy)]
    storage_policy: StoragePolicy,

    /// User agent string to identify the client.
    #[arg(long)]
    user_agent: Option<String>,

    /// Start a header sync once peers are up.
    #[arg(long, default_value_t = false)]
    sync_headers: bool,

    /// Fetch a block by hash and log its size.
    #[arg(long = "fetch-block")]
    fetch_block: Vec<BlockHash>,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Log level; RUST_LOG takes precedence when set.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Disable colored output.
    #[arg(long, default_value_t = false)]
    no_color: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

fn parse_storage_policy(value: &str) -> Result<StoragePolicy, String> {
    match value.to_ascii_lowercase().as_str() {
        "all" => Ok(StoragePolicy::All),
        "cache" => Ok(StoragePolicy::Cache),
        "none" => Ok(StoragePolicy::None),
        other => Err(format!("unknown storage policy: {other}")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    init_tracing(&args)?;

    let config = load_config(&args)?;
    info!(
        "Starting {} node on {} ({})",
        config.user_agent, config.chain, blockchain_p2p::VERSION
    );

    let genesis = config.chain.genesis_header();
    let collaborators =
        Collaborators::default().with_headers(Arc::new(MemoryHeaderOracle::with_genesis(genesis)));
    let manager = PeerManager::start(config, collaborators)?;

    for addr in &args.listen {
        if !manager.listen(*addr).await {
            warn!("Could not listen on {}", addr);
        }
    }
    for addr in &args.connect {
        if manager.add_peer(*addr).await {
            info!("Connected to {}", addr);
        } else {
            warn!("Could not connect to {}", addr);
        }
    }

    if args.sync_headers && !manager.request_headers().await {
        warn!("No peers to sync headers from");
    }
    for hash in &args.fetch_block {
        let Some(waiter) = manager.fetch_block(*hash).await else {
            warn!("No peers to fetch block {} from", hash);
            continue;
        };
        let hash = *hash;
        tokio::spawn(async move {
            match waiter.wait().await {
                Ok(JobOutput::Block(block)) => {
                    info!("Block {} has {} transactions", hash, block.txdata.len());
                }
                Ok(other) => warn!("Unexpected result for block {}: {:?}", hash, other),
                Err(e) => error!("Failed to fetch block {}: {}", hash, e),
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, peers: {}", serde_json::to_string(&manager.peers().await)?);
    manager.shutdown().await;

    Ok(())
}

fn load_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    if let Some(path) = &args.config {
        return Ok(Config::from_json_file(path)?);
    }

    let mut config = Config::new(args.chain).with_storage_policy(args.storage_policy);
    if let Some(seed) = &args.seed {
        config = config.with_seed_node(seed.clone());
    }
    if let Some(user_agent) = &args.user_agent {
        config = config.with_user_agent(user_agent.clone());
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::default()
            .add_directive(Level::from(args.log_level).into())
            .add_directive("tokio=warn".parse()?),
    };
    let ansi = std::io::IsTerminal::is_terminal(&std::io::stderr()) && !args.no_color;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoUtc::rfc_3339())
        .with_ansi(ansi)
        .with_target(args.verbose)
        .with_thread_ids(args.verbose)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| -> Box<dyn std::error::Error> { e })
}
