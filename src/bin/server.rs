//! TandemKV Server Binary
//!
//! Runs one replicated node.

use std::sync::Arc;

use clap::Parser;
use tandemkv::config::WalSyncStrategy;
use tandemkv::network::Server;
use tandemkv::{Config, DiskKv, ReplicatedStore};
use tracing_subscriber::{fmt, EnvFilter};

/// TandemKV Server
#[derive(Parser, Debug)]
#[command(name = "tandemkv-server")]
#[command(about = "Replicated key-value store node")]
#[command(version)]
struct Args {
    /// Name of this node
    #[arg(short, long, default_value = "node1")]
    node: String,

    /// Data directory
    #[arg(short, long, default_value = "./tandemkv_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:6380")]
    listen: String,

    /// Cluster member as name=host:port (repeatable)
    #[arg(short, long = "peer", value_parser = parse_peer)]
    peers: Vec<(String, String)>,

    /// Promote this node to primary at start-up
    #[arg(long)]
    primary: bool,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Maximum WAL segment size in MB
    #[arg(long, default_value = "1024")]
    wal_segment_mb: u64,

    /// fsync after every write instead of on an interval
    #[arg(long)]
    sync_every_write: bool,

    /// Peer worker tick in milliseconds
    #[arg(long, default_value = "1000")]
    peer_tick_ms: u64,
}

fn parse_peer(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, addr)) if !name.is_empty() && !addr.is_empty() => {
            Ok((name.to_string(), addr.to_string()))
        }
        _ => Err(format!("expected name=host:port, got '{}'", raw)),
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tandemkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("TandemKV Server v{}", tandemkv::VERSION);
    tracing::info!("Node: {}", args.node);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    let sync_strategy = if args.sync_every_write {
        WalSyncStrategy::EveryWrite
    } else {
        WalSyncStrategy::Interval { millis: 200 }
    };

    // Build config from args
    let mut builder = Config::builder()
        .node_name(&args.node)
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .wal_max_file_size(args.wal_segment_mb * 1024 * 1024)
        .wal_sync_strategy(sync_strategy)
        .peer_tick_ms(args.peer_tick_ms);
    for (name, addr) in &args.peers {
        builder = builder.peer(name, addr);
    }
    let config = builder.build();

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        std::process::exit(2);
    }

    let server = match Server::bind(&config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    let kv = match DiskKv::open(&config.kv_dir()) {
        Ok(kv) => Arc::new(kv),
        Err(e) => {
            tracing::error!("Failed to open KV store: {}", e);
            std::process::exit(1);
        }
    };

    let store = match ReplicatedStore::open(&config, kv, &server) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Store opened at {} ({} standby peer(s) configured)",
        store.engine().current_sequence(),
        store.coordinator().standby_count()
    );

    if args.primary {
        if let Err(e) = store.promote() {
            tracing::error!("Promotion failed: {}", e);
            std::process::exit(1);
        }
    }

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
    }

    if let Err(e) = store.shutdown() {
        tracing::error!("Shutdown error: {}", e);
    }
    tracing::info!("Server stopped");
}
