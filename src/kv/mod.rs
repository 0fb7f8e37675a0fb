//! KV Store Module
//!
//! The durable byte-keyed map the storage engine applies entries to.
//!
//! ## Responsibilities
//! - Point reads and full overwrites
//! - Deletes (entries logged with the deleted flag)
//! - Ordered dumps for snapshots
//!
//! Two backends ship with the crate:
//! - `MemoryKv`: BTreeMap behind an RwLock; state lives only as long as the
//!   process, so recovery rebuilds it entirely from the WAL
//! - `DiskKv`: one checksummed file per key; survives restarts

mod disk;
mod memory;

pub use disk::DiskKv;
pub use memory::MemoryKv;

use crate::error::Result;

/// Byte-keyed map consumed by the storage engine
pub trait KvStore: Send + Sync {
    /// Insert or overwrite a key
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Read a key; `Ok(None)` when absent
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove a key; removing an absent key is not an error
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Every entry in ascending key order
    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}
