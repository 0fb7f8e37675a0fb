//! Configuration for TandemKV
//!
//! Centralized configuration with sensible defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, TandemError};
use crate::wal::PAGE_SIZE;

/// Main configuration for a TandemKV node
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal/   (segment files named by term + collection)
    ///     └── kv/    (DiskKv files, when the disk backend is used)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    pub wal: WalConfig,

    // -------------------------------------------------------------------------
    // Cluster Configuration
    // -------------------------------------------------------------------------
    pub cluster: ClusterConfig,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,
}

/// WAL settings
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// A segment rotates once the next page would push it past this size
    pub max_file_size: u64,

    /// Sync strategy: how often to fsync the active segment
    pub sync_strategy: WalSyncStrategy,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// A background thread fsyncs the dirty segment on a fixed interval.
    /// Bounds crash data loss to roughly one interval.
    Interval { millis: u64 },
}

/// Primary/standby cluster settings
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Name of this node, as it appears in `peers`
    pub node_name: String,

    /// Every node in the replicated pair: name -> address. May include self.
    pub peers: BTreeMap<String, String>,

    /// Delay between peer-worker ticks
    pub peer_tick_ms: u64,

    /// Standbys not heard from within this window are evicted by the reaper
    pub liveness_window_ms: u64,

    /// How often the reaper runs
    pub reaper_interval_ms: u64,

    /// Timeout applied to each peer request
    pub request_timeout_ms: u64,
}

impl ClusterConfig {
    /// Configured peers excluding this node
    pub fn remote_peers(&self) -> impl Iterator<Item = (&String, &String)> {
        self.peers
            .iter()
            .filter(move |(name, _)| name.as_str() != self.node_name)
    }

    /// Number of standbys a primary expects to have registered
    pub fn standby_count(&self) -> usize {
        self.remote_peers().count()
    }

    pub fn peer_tick(&self) -> Duration {
        Duration::from_millis(self.peer_tick_ms)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024 * 1024, // 1 GiB
            sync_strategy: WalSyncStrategy::Interval { millis: 200 },
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_name: "node1".to_string(),
            peers: BTreeMap::new(),
            peer_tick_ms: 1000,
            liveness_window_ms: 20_000,
            reaper_interval_ms: 1000,
            request_timeout_ms: 5000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tandemkv_data"),
            wal: WalConfig::default(),
            cluster: ClusterConfig::default(),
            listen_addr: "127.0.0.1:6380".to_string(),
            max_connections: 1024,
            read_timeout_ms: 0,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    const WAL_DIR: &'static str = "wal";
    const KV_DIR: &'static str = "kv";

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Directory holding WAL segment files
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join(Self::WAL_DIR)
    }

    /// Directory used by the disk-backed KV store
    pub fn kv_dir(&self) -> PathBuf {
        self.data_dir.join(Self::KV_DIR)
    }

    /// Reject settings the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.wal.max_file_size < PAGE_SIZE as u64 {
            return Err(TandemError::Config(format!(
                "wal max file size {} is smaller than one page ({} bytes)",
                self.wal.max_file_size, PAGE_SIZE
            )));
        }
        if let WalSyncStrategy::Interval { millis: 0 } = self.wal.sync_strategy {
            return Err(TandemError::Config(
                "wal sync interval must be greater than zero".to_string(),
            ));
        }
        if self.cluster.node_name.is_empty() {
            return Err(TandemError::Config("node name must not be empty".to_string()));
        }
        if self.cluster.peer_tick_ms == 0 || self.cluster.reaper_interval_ms == 0 {
            return Err(TandemError::Config(
                "peer tick and reaper interval must be greater than zero".to_string(),
            ));
        }
        if self.cluster.request_timeout_ms == 0 {
            return Err(TandemError::Config(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(TandemError::Config(
                "max connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the maximum WAL segment size (in bytes)
    pub fn wal_max_file_size(mut self, size: u64) -> Self {
        self.config.wal.max_file_size = size;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal.sync_strategy = strategy;
        self
    }

    /// Set this node's name
    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.config.cluster.node_name = name.into();
        self
    }

    /// Add a cluster member
    pub fn peer(mut self, name: impl Into<String>, addr: impl Into<String>) -> Self {
        self.config.cluster.peers.insert(name.into(), addr.into());
        self
    }

    /// Set the peer-worker tick (in milliseconds)
    pub fn peer_tick_ms(mut self, ms: u64) -> Self {
        self.config.cluster.peer_tick_ms = ms;
        self
    }

    /// Set the standby liveness window (in milliseconds)
    pub fn liveness_window_ms(mut self, ms: u64) -> Self {
        self.config.cluster.liveness_window_ms = ms;
        self
    }

    /// Set the reaper interval (in milliseconds)
    pub fn reaper_interval_ms(mut self, ms: u64) -> Self {
        self.config.cluster.reaper_interval_ms = ms;
        self
    }

    /// Set the per-request peer timeout (in milliseconds)
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.cluster.request_timeout_ms = ms;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds, 0 disables)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds, 0 disables)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
