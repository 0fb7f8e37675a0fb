//! Disk KV backend
//!
//! Stores each key in its own file.
//!
//! ## Responsibilities
//! - Map keys to file names (lowercase hex, so names sort like keys)
//! - Write values atomically (temp file + fsync + rename)
//! - Detect corrupted values with a CRC32 prefix
//!
//! ## File Format
//! ```text
//! ┌──────────┬─────────────────────┐
//! │ CRC (4)  │       Value         │
//! └──────────┴─────────────────────┘
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, TandemError};

use super::KvStore;

/// Longest key accepted; its hex form must fit a file name
pub const MAX_KEY_LEN: usize = 120;

const TMP_SUFFIX: &str = ".tmp";

/// Durable file-per-key store
///
/// ## Concurrency:
/// - Writers to the same key race at the rename; the last rename wins
/// - Readers always see a complete value (rename is atomic)
pub struct DiskKv {
    /// Directory holding one file per key
    dir: PathBuf,
}

impl DiskKv {
    /// Open or create a store in the given directory
    ///
    /// Leftover temp files from an interrupted write are removed.
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(TMP_SUFFIX) {
                fs::remove_file(entry.path())?;
            }
        }

        Ok(Self {
            dir: path.to_path_buf(),
        })
    }

    /// Get the data directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn key_path(&self, key: &[u8]) -> Result<PathBuf> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(TandemError::Storage(format!(
                "key length {} outside 1..={}",
                key.len(),
                MAX_KEY_LEN
            )));
        }
        Ok(self.dir.join(encode_key(key)))
    }

    fn read_value(path: &Path) -> Result<Option<Vec<u8>>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() < 4 {
            return Err(TandemError::Storage(format!(
                "value file {} is truncated",
                path.display()
            )));
        }

        let stored = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let value = &bytes[4..];
        if crc32fast::hash(value) != stored {
            return Err(TandemError::Storage(format!(
                "checksum mismatch in value file {}",
                path.display()
            )));
        }

        Ok(Some(value.to_vec()))
    }
}

impl KvStore for DiskKv {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let path = self.key_path(key)?;
        let tmp_path = path.with_extension(&TMP_SUFFIX[1..]);

        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&crc32fast::hash(value).to_le_bytes())?;
            file.write_all(value)?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, &path)?;

        // Make the rename itself durable
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key)?;
        Self::read_value(&path)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.path().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Some(key) = decode_key(name) {
                    names.push((name.to_string(), key));
                }
            }
        }

        // Hex preserves byte order, so sorting names sorts keys
        names.sort();

        let mut entries = Vec::with_capacity(names.len());
        for (name, key) in names {
            // A concurrent delete may remove the file between listing and reading
            if let Some(value) = Self::read_value(&self.dir.join(&name))? {
                entries.push((key, value));
            }
        }
        Ok(entries)
    }
}

/// "ab" → "6162"
fn encode_key(key: &[u8]) -> String {
    key.iter().map(|b| format!("{:02x}", b)).collect()
}

/// "6162" → Some(b"ab"); None for anything that is not lowercase hex
fn decode_key(name: &str) -> Option<Vec<u8>> {
    if name.is_empty() || name.len() % 2 != 0 {
        return None;
    }
    if !name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    (0..name.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&name[i..i + 2], 16).ok())
        .collect()
}
