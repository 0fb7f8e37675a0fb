//! # TandemKV
//!
//! A node-local key-value store with primary/standby replication:
//! - Paged, checksummed Write-Ahead Log (WAL) with segment rotation
//! - Crash recovery with torn-record repair
//! - Snapshot + incremental-log bootstrap of standbys
//! - Synchronous log shipping and manual promotion
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │           (clients + REPLICATOR.* from peers)                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  ReplicatedStore                             │
//! │        (write lock: engine write, then Ship)                 │
//! └──────────┬──────────────────────────────┬───────────────────┘
//!            │                              │
//!            ▼                              ▼
//!   ┌─────────────────┐           ┌───────────────────┐
//!   │  StorageEngine  │           │  PrimaryStandby   │
//!   │ (log then apply)│           │ (roles, peers,    │
//!   └───────┬─────────┘           │  ship, reaper)    │
//!           │                     └───────────────────┘
//!     ┌─────┴──────┐
//!     ▼            ▼
//! ┌────────┐  ┌─────────┐
//! │  WAL   │  │ KvStore │
//! │(pages) │  │         │
//! └────────┘  └─────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod engine;
pub mod kv;
pub mod network;
pub mod protocol;
pub mod replication;
pub mod wal;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::Config;
pub use engine::StorageEngine;
pub use error::{Result, TandemError};
pub use kv::{DiskKv, KvStore, MemoryKv};
pub use replication::{ReplicatedStore, Role};
pub use wal::SequenceId;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of TandemKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
