//! Replicated store
//!
//! Glues the storage engine to the coordinator: local writes are logged,
//! applied and then shipped under one lock, and the engine supplies the
//! coordinator's snapshot and apply callbacks.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::engine::{KvEntry, Snapshot, StorageEngine, WalRecord};
use crate::error::{Result, TandemError};
use crate::kv::KvStore;
use crate::network::CommandRegistrar;
use crate::protocol::Reply;
use crate::wal::SequenceId;

use super::{PrimaryStandby, ReplicationHooks, Role};

/// SYNC_REG reply body: a snapshot plus every log written after it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub snapshot: Snapshot,
    pub logs: Vec<WalRecord>,
}

/// `ReplicationHooks` backed by a `StorageEngine`
pub struct EngineHooks {
    engine: Arc<StorageEngine>,
}

impl EngineHooks {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self { engine }
    }
}

impl ReplicationHooks for EngineHooks {
    fn current_sequence(&self) -> SequenceId {
        self.engine.current_sequence()
    }

    fn snapshot(&self, from: SequenceId) -> Result<Vec<u8>> {
        let term = self.engine.current_sequence().term;
        let snapshot = self.engine.latest_snapshot(term)?;
        let logs = self.engine.wal_logs(snapshot.sequence_id)?;

        tracing::debug!(
            "Snapshot for standby at {}: {} entries at {}, {} newer logs",
            from,
            snapshot.entries.len(),
            snapshot.sequence_id,
            logs.len()
        );
        Ok(bincode::serialize(&SyncPayload { snapshot, logs })?)
    }

    fn apply_snapshot_and_incremental(&self, payload: &[u8]) -> Result<()> {
        let sync: SyncPayload = bincode::deserialize(payload)?;
        self.engine.install_snapshot(&sync.snapshot)?;
        let applied = self.engine.replay(&sync.logs)?;
        tracing::debug!("Replayed {} of {} incremental logs", applied, sync.logs.len());
        Ok(())
    }

    fn apply_wal_log(&self, payload: &[u8]) -> Result<()> {
        let record: WalRecord = bincode::deserialize(payload)?;
        self.engine.replay(std::slice::from_ref(&record))?;
        Ok(())
    }

    /// A new primary writes in a new term
    fn on_promote(&self) -> Result<()> {
        let term = self.engine.current_sequence().term + 1;
        let position = self.engine.start_term(term)?;
        tracing::info!("Started term {} at {}", term, position);
        Ok(())
    }
}

/// Replicated key/value store for one node
pub struct ReplicatedStore {
    engine: Arc<StorageEngine>,
    coordinator: PrimaryStandby,

    /// Held across engine write + ship so ship order equals WAL order
    write_lock: Mutex<()>,
}

impl ReplicatedStore {
    /// Open the engine over `kv`, register GET/SET/DEL and the replication
    /// commands with `registrar`, and start replication. The node starts as
    /// a standby.
    pub fn open(
        config: &Config,
        kv: Arc<dyn KvStore>,
        registrar: &dyn CommandRegistrar,
    ) -> Result<Arc<Self>> {
        let engine = Arc::new(StorageEngine::open(config, kv)?);
        let hooks = Arc::new(EngineHooks::new(Arc::clone(&engine)));
        let coordinator = PrimaryStandby::new(config, hooks);

        let store = Arc::new(Self {
            engine,
            coordinator,
            write_lock: Mutex::new(()),
        });

        register_user_commands(&store, registrar);
        store.coordinator.initialize(registrar)?;
        Ok(store)
    }

    /// Write `key`, then ship the log to every ready standby.
    ///
    /// A `ShipFailed` error means the write is durable locally but at least
    /// one standby missed it (and was de-registered).
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<SequenceId> {
        self.write(KvEntry::put(key, value))
    }

    /// Delete `key`; shipped like `put`
    pub fn delete(&self, key: &[u8]) -> Result<SequenceId> {
        self.write(KvEntry::delete(key))
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.engine.get(key)
    }

    pub fn promote(&self) -> Result<()> {
        self.coordinator.promote()
    }

    pub fn role(&self) -> Role {
        self.coordinator.role()
    }

    pub fn writable(&self) -> bool {
        self.coordinator.writable()
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    pub fn coordinator(&self) -> &PrimaryStandby {
        &self.coordinator
    }

    /// Stop replication workers and flush the WAL
    pub fn shutdown(&self) -> Result<()> {
        self.coordinator.shutdown();
        self.engine.sync()
    }

    fn write(&self, entry: KvEntry) -> Result<SequenceId> {
        if !self.role().is_primary() {
            return Err(TandemError::NotPrimary);
        }

        let _write_guard = self.write_lock.lock();
        let sequence_id = if entry.deleted {
            self.engine.delete(&entry.key)?
        } else {
            self.engine.put(&entry.key, &entry.value)?
        };

        let record = WalRecord { sequence_id, entry };
        self.coordinator.ship(&bincode::serialize(&record)?)?;
        Ok(sequence_id)
    }
}

fn register_user_commands(store: &Arc<ReplicatedStore>, registrar: &dyn CommandRegistrar) {
    let s = Arc::clone(store);
    registrar.add_command_handler(
        "GET",
        Arc::new(move |args: &[Vec<u8>]| {
            let [_, key] = args else {
                return Err(arity("GET"));
            };
            Ok(match s.get(key)? {
                Some(value) => Reply::Bulk(value),
                None => Reply::Null,
            })
        }),
    );

    let s = Arc::clone(store);
    registrar.add_command_handler(
        "SET",
        Arc::new(move |args: &[Vec<u8>]| {
            let [_, key, value] = args else {
                return Err(arity("SET"));
            };
            s.put(key, value)?;
            Ok(Reply::ok())
        }),
    );

    let s = Arc::clone(store);
    registrar.add_command_handler(
        "DEL",
        Arc::new(move |args: &[Vec<u8>]| {
            let [_, key] = args else {
                return Err(arity("DEL"));
            };
            s.delete(key)?;
            Ok(Reply::ok())
        }),
    );
}

fn arity(command: &str) -> TandemError {
    TandemError::Protocol(format!("wrong number of arguments for {}", command))
}
