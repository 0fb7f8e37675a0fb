//! Replication Module
//!
//! Primary/standby replication for a pair (or small set) of nodes.
//!
//! ## Flow
//! ```text
//!   standby peer worker                      primary
//!   ───────────────────                      ───────
//!   REPLICATOR.ROLE node [ready] ──────▶     touch last-seen, reply role
//!   REPLICATOR.SYNC_REG node seq ──────▶     mark pending, build snapshot,
//!                               ◀───────     mark ready, reply {snapshot, logs}
//!   install snapshot, replay logs
//!                               ◀───────     REPLICATOR.SHIP record (per write)
//! ```
//!
//! A standby that believes it is synchronized adds `ready` to ROLE; a
//! primary that no longer has it registered answers with an error, and the
//! standby handshakes again.
//!
//! Roles are set at start-up and changed only by manual promotion; there is
//! no election and no demotion.

mod commands;
mod coordinator;
mod store;

use std::fmt;

use crate::error::{Result, TandemError};
use crate::wal::SequenceId;

pub use commands::ReplicatorClient;
pub use coordinator::{PrimaryStandby, ShipOutcome, StandbyStatus};
pub use store::{EngineHooks, ReplicatedStore, SyncPayload};

pub const ROLE_COMMAND: &str = "REPLICATOR.ROLE";
pub const SYNC_REG_COMMAND: &str = "REPLICATOR.SYNC_REG";
pub const SHIP_COMMAND: &str = "REPLICATOR.SHIP";
pub const PROMOTE_COMMAND: &str = "REPLICATOR.PROMOTE";

/// Trailing ROLE argument sent by a standby that considers itself synchronized
pub const READY_FLAG: &[u8] = b"ready";

/// Replication role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    Primary = 1,
    Standby = 2,
}

impl Role {
    /// Integer sent in ROLE replies
    pub fn as_wire(self) -> i64 {
        self as i64
    }

    pub fn from_wire(value: i64) -> Result<Self> {
        match value {
            1 => Ok(Role::Primary),
            2 => Ok(Role::Standby),
            other => Err(TandemError::Protocol(format!("unknown role: {}", other))),
        }
    }

    pub fn is_primary(self) -> bool {
        self == Role::Primary
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Standby => write!(f, "standby"),
        }
    }
}

/// Storage callbacks the coordinator drives.
///
/// The coordinator only moves opaque byte payloads between nodes; the
/// owning application decides what a snapshot and a shipped log are.
pub trait ReplicationHooks: Send + Sync {
    /// This node's current log position, sent with SYNC_REG
    fn current_sequence(&self) -> SequenceId;

    /// Primary side: a full snapshot plus every log newer than it, encoded
    fn snapshot(&self, from: SequenceId) -> Result<Vec<u8>>;

    /// Standby side: install a payload produced by `snapshot`
    fn apply_snapshot_and_incremental(&self, payload: &[u8]) -> Result<()>;

    /// Standby side: apply one shipped log
    fn apply_wal_log(&self, payload: &[u8]) -> Result<()>;

    /// Called once when a standby becomes primary, before it accepts writes
    fn on_promote(&self) -> Result<()> {
        Ok(())
    }
}
