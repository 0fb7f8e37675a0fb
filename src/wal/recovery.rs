//! WAL Recovery
//!
//! Inspects the newest segment after a restart and repairs a torn tail so
//! that replay never sees a half-written record.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::Path;

use crate::error::Result;

use super::page::{decode_page, PageType, PAGE_SIZE};
use super::reader::{read_full, WalReader};

/// State of a segment's tail as found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailInfo {
    /// Complete, checksum-valid pages
    pub pages: u64,

    /// Type of the last complete page, if any
    pub last_page: Option<PageType>,

    /// Bytes after the last page boundary (a torn page write)
    pub torn_bytes: u64,
}

impl TailInfo {
    /// True when the tail leaves a split record without its End page
    pub fn is_dangling(&self) -> bool {
        self.last_page.map(PageType::is_dangling).unwrap_or(false)
    }
}

/// Outcome of repairing the newest segment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Complete pages found in the newest segment before repair
    pub pages: u64,

    /// Bytes of a partially written page that were cut off
    pub truncated_bytes: u64,

    /// Whether a BrokenEnd page must close a torn record
    pub needs_broken_end: bool,
}

/// Handles WAL tail recovery after a crash
pub struct WalRecovery;

impl WalRecovery {
    /// Read every page of a segment, validating checksums.
    ///
    /// A checksum failure on a complete page is fatal; only a trailing
    /// partial page is tolerated and reported through `torn_bytes`.
    pub fn inspect(path: &Path) -> Result<TailInfo> {
        let file_len = std::fs::metadata(path)?.len();
        let torn_bytes = file_len % PAGE_SIZE as u64;
        let full_pages = file_len / PAGE_SIZE as u64;

        let mut reader = WalReader::open(path)?;
        let mut last_page = None;
        while reader.pages_read() < full_pages {
            match reader.next_page()? {
                Some((page_type, _)) => last_page = Some(page_type),
                None => break,
            }
        }

        Ok(TailInfo {
            pages: reader.pages_read(),
            last_page,
            torn_bytes,
        })
    }

    /// Type of the last complete page of a segment, without scanning it all
    pub fn last_page_type(path: &Path) -> Result<Option<PageType>> {
        let file_len = std::fs::metadata(path)?.len();
        let full_pages = file_len / PAGE_SIZE as u64;
        if full_pages == 0 {
            return Ok(None);
        }

        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start((full_pages - 1) * PAGE_SIZE as u64))?;
        let mut buf = vec![0u8; PAGE_SIZE];
        read_full(&mut file, &mut buf)?;

        let (page_type, _) = decode_page(&buf)?;
        Ok(Some(page_type))
    }

    /// Cut a torn partial page off the newest segment and decide whether the
    /// tail needs a BrokenEnd page.
    ///
    /// `previous` is the segment before `path`; it is consulted when the
    /// newest segment is empty, since a split record may span a rotation.
    pub fn recover(path: &Path, previous: Option<&Path>) -> Result<RecoveryResult> {
        let tail = Self::inspect(path)?;

        if tail.torn_bytes > 0 {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(tail.pages * PAGE_SIZE as u64)?;
            file.sync_all()?;
            tracing::warn!(
                "Truncated {} bytes of a torn page from {}",
                tail.torn_bytes,
                path.display()
            );
        }

        let dangling = match (tail.last_page, previous) {
            (Some(page_type), _) => page_type.is_dangling(),
            (None, Some(prev)) => Self::last_page_type(prev)?
                .map(PageType::is_dangling)
                .unwrap_or(false),
            (None, None) => false,
        };

        Ok(RecoveryResult {
            pages: tail.pages,
            truncated_bytes: tail.torn_bytes,
            needs_broken_end: dangling || tail.torn_bytes > 0,
        })
    }
}
