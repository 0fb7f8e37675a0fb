//! Engine Module
//!
//! The storage engine: a WAL in front of a durable KV store.
//!
//! ## Responsibilities
//! - Log every mutation before applying it
//! - Track the last applied WAL position (the version marker)
//! - Replay the WAL on startup to converge after a crash
//! - Export snapshots and incremental logs for replication, and import them

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Result, TandemError};
use crate::kv::KvStore;
use crate::wal::{SequenceId, WalLog};

/// Prefix reserved for engine bookkeeping keys
pub const RESERVED_PREFIX: &[u8] = b"\x00tandem/";

/// Last WAL position applied to the KV store
pub const VERSION_KEY: &[u8] = b"\x00tandem/version";

/// Last primary WAL position applied through replication
pub const REPLICATED_KEY: &[u8] = b"\x00tandem/replicated";

/// Logical unit recorded in the WAL and applied to the KV store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub deleted: bool,
}

impl KvEntry {
    pub fn put(key: &[u8], value: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            value: value.to_vec(),
            deleted: false,
        }
    }

    pub fn delete(key: &[u8]) -> Self {
        Self {
            key: key.to_vec(),
            value: Vec::new(),
            deleted: true,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A WAL entry together with the position it was logged at on the primary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    pub sequence_id: SequenceId,
    pub entry: KvEntry,
}

/// One key/value pair in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Full point-in-time dump of the user keyspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Every record at or before this position is reflected in `entries`
    pub sequence_id: SequenceId,

    /// Term the snapshot was requested for
    pub term: u64,

    /// Unix millis when the dump was taken
    pub created_at_ms: u64,

    /// Entries in ascending key order, bookkeeping keys excluded
    pub entries: Vec<SnapshotEntry>,
}

/// The storage engine
///
/// ## Write Path
/// `write_lock` → WAL append → KV apply → version marker. A crash between
/// any two steps is repaired by replay: every entry is a full overwrite (or
/// delete), so re-applying it converges to the same state.
///
/// ## Reads
/// Pass straight through to the KV store; they are neither logged nor locked.
pub struct StorageEngine {
    wal: WalLog,
    kv: Arc<dyn KvStore>,

    /// Serializes write operations so KV apply order equals WAL order
    write_lock: Mutex<()>,
}

impl StorageEngine {
    /// Build an engine over `kv`; call `initialize` before use
    pub fn new(config: &Config, kv: Arc<dyn KvStore>) -> Self {
        Self {
            wal: WalLog::new(&config.wal_dir(), &config.wal),
            kv,
            write_lock: Mutex::new(()),
        }
    }

    /// Build and initialize in one step
    pub fn open(config: &Config, kv: Arc<dyn KvStore>) -> Result<Self> {
        config.validate()?;
        let engine = Self::new(config, kv);
        engine.initialize()?;
        Ok(engine)
    }

    /// Recover after a restart
    ///
    /// On startup:
    /// 1. Initialize the WAL (repairs a torn tail)
    /// 2. Read the version marker (default: start of log)
    /// 3. Replay every record logged after the marker
    /// 4. Persist the WAL tail as the new marker
    ///
    /// A marker past the recovered tail means unsynced WAL pages were lost
    /// in a crash; the marker is pulled back to the tail.
    pub fn initialize(&self) -> Result<SequenceId> {
        let _write_guard = self.write_lock.lock();

        let wal_tail = self.wal.initialize()?;

        let mut version = self.read_marker(VERSION_KEY)?.unwrap_or(SequenceId::START);
        if version > wal_tail {
            tracing::warn!(
                "Version marker {} is ahead of the WAL tail {}; unsynced writes were lost",
                version,
                wal_tail
            );
            version = wal_tail;
        }

        let mut recovered = 0u64;
        let tail = self.wal.replay_incomplete(version, |position, bytes| {
            // Already applied, or superseded by an installed snapshot
            if position <= version {
                return Ok(());
            }
            let entry = KvEntry::decode(bytes)?;
            self.apply_to_kv(&entry)?;
            recovered += 1;
            Ok(())
        })?;
        self.write_marker(VERSION_KEY, tail)?;

        tracing::info!(
            "Engine recovered from {} to {} ({} entries replayed)",
            version,
            tail,
            recovered
        );
        Ok(tail)
    }

    /// Put a key-value pair; returns the WAL position of the entry
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<SequenceId> {
        check_user_key(key)?;
        let _write_guard = self.write_lock.lock();
        self.log_and_apply(&KvEntry::put(key, value))
    }

    /// Delete a key; returns the WAL position of the tombstone entry
    pub fn delete(&self, key: &[u8]) -> Result<SequenceId> {
        check_user_key(key)?;
        let _write_guard = self.write_lock.lock();
        self.log_and_apply(&KvEntry::delete(key))
    }

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.kv.get(key)
    }

    /// Full dump of the user keyspace stamped with the version marker.
    ///
    /// The marker is read before the dump so that anything written during
    /// the dump is also returned by `wal_logs(snapshot.sequence_id)`.
    pub fn latest_snapshot(&self, term: u64) -> Result<Snapshot> {
        let sequence_id = self.current_position()?;

        let entries = self
            .kv
            .entries()?
            .into_iter()
            .filter(|(key, _)| !is_reserved(key))
            .map(|(key, value)| SnapshotEntry { key, value })
            .collect();

        Ok(Snapshot {
            sequence_id,
            term,
            created_at_ms: now_millis(),
            entries,
        })
    }

    /// Every record logged strictly after `from`.
    ///
    /// Fails with `InsufficientHistory` when `from` precedes the retained
    /// segments, and with `AheadOfTail` when it is past the tail.
    pub fn wal_logs(&self, from: SequenceId) -> Result<Vec<WalRecord>> {
        let mut records = Vec::new();
        self.wal.replay_incomplete(from, |sequence_id, bytes| {
            if sequence_id > from {
                records.push(WalRecord {
                    sequence_id,
                    entry: KvEntry::decode(bytes)?,
                });
            }
            Ok(())
        })?;
        Ok(records)
    }

    /// Apply records shipped from a primary.
    ///
    /// Records at or below the replicated-position marker were already
    /// applied and are skipped, so redelivery is harmless. Each applied
    /// record is logged to the local WAL. Returns how many were applied.
    pub fn replay(&self, records: &[WalRecord]) -> Result<usize> {
        let _write_guard = self.write_lock.lock();

        let mut fence = self.read_marker(REPLICATED_KEY)?;
        let mut applied = 0;
        for record in records {
            if fence.map_or(false, |f| record.sequence_id <= f) {
                tracing::debug!("Skipping already applied record {}", record.sequence_id);
                continue;
            }
            check_user_key(&record.entry.key)?;
            self.log_and_apply(&record.entry)?;
            self.write_marker(REPLICATED_KEY, record.sequence_id)?;
            fence = Some(record.sequence_id);
            applied += 1;
        }
        Ok(applied)
    }

    /// Replace the user keyspace with a snapshot.
    ///
    /// Entries go straight to the KV store; keys missing from the snapshot
    /// are removed. The replicated-position marker is reset to the
    /// snapshot's position.
    pub fn install_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let _write_guard = self.write_lock.lock();

        let mut stale: Vec<Vec<u8>> = self
            .kv
            .entries()?
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| !is_reserved(key))
            .collect();

        for entry in &snapshot.entries {
            check_user_key(&entry.key)?;
            self.kv.put(&entry.key, &entry.value)?;
        }

        // Both lists are sorted by key
        stale.retain(|key| {
            snapshot
                .entries
                .binary_search_by(|e| e.key.as_slice().cmp(key.as_slice()))
                .is_err()
        });
        for key in &stale {
            self.kv.delete(key)?;
        }

        self.write_marker(REPLICATED_KEY, snapshot.sequence_id)?;
        // Local records older than the snapshot must never be replayed over it
        self.write_marker(VERSION_KEY, self.wal.current_sequence())?;

        tracing::info!(
            "Installed snapshot at {} ({} entries, {} stale keys removed)",
            snapshot.sequence_id,
            snapshot.entries.len(),
            stale.len()
        );
        Ok(())
    }

    /// Move the WAL into a new term
    pub fn start_term(&self, term: u64) -> Result<SequenceId> {
        let _write_guard = self.write_lock.lock();
        self.wal.start_term(term)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Persisted version marker (last applied WAL position)
    pub fn current_position(&self) -> Result<SequenceId> {
        Ok(self.read_marker(VERSION_KEY)?.unwrap_or(SequenceId::START))
    }

    /// In-memory WAL tail
    pub fn current_sequence(&self) -> SequenceId {
        self.wal.current_sequence()
    }

    /// Last primary position applied through replication, if any
    pub fn replicated_position(&self) -> Result<Option<SequenceId>> {
        self.read_marker(REPLICATED_KEY)
    }

    /// Force sync of the WAL
    pub fn sync(&self) -> Result<()> {
        self.wal.sync()
    }

    pub fn wal(&self) -> &WalLog {
        &self.wal
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Called with `write_lock` held
    fn log_and_apply(&self, entry: &KvEntry) -> Result<SequenceId> {
        let sequence_id = self.wal.write_entry(&entry.encode()?)?;
        self.apply_to_kv(entry)?;
        self.write_marker(VERSION_KEY, sequence_id)?;
        Ok(sequence_id)
    }

    fn apply_to_kv(&self, entry: &KvEntry) -> Result<()> {
        if entry.deleted {
            self.kv.delete(&entry.key)
        } else {
            self.kv.put(&entry.key, &entry.value)
        }
    }

    fn read_marker(&self, key: &[u8]) -> Result<Option<SequenceId>> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_marker(&self, key: &[u8], sequence_id: SequenceId) -> Result<()> {
        self.kv.put(key, &bincode::serialize(&sequence_id)?)
    }
}

/// True for keys in the engine's bookkeeping namespace
pub fn is_reserved(key: &[u8]) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

fn check_user_key(key: &[u8]) -> Result<()> {
    if is_reserved(key) {
        return Err(TandemError::ReservedKey);
    }
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
