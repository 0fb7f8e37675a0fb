//! WAL Writer
//!
//! Appends pages to the active segment and rotates to a new collection when
//! the segment would exceed its size limit.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, TandemError};

use super::page::{encode_page, PageType, PAGE_CAPACITY, PAGE_SIZE};
use super::segment::segment_path;
use super::SequenceId;

/// Writes pages to the active segment file
pub struct WalWriter {
    /// Directory holding the segment files
    dir: PathBuf,

    /// Open handle to the active segment (None until the first write)
    file: Option<File>,

    term: u64,
    collection: u64,

    /// Pages in the active segment
    seq: u64,

    /// Rotation threshold in bytes
    max_file_size: u64,
}

impl WalWriter {
    /// Create a writer positioned at the start of an empty log
    pub fn new(dir: &Path, max_file_size: u64) -> Self {
        Self {
            dir: dir.to_path_buf(),
            file: None,
            term: SequenceId::START.term,
            collection: SequenceId::START.collection,
            seq: SequenceId::START.seq,
            max_file_size,
        }
    }

    /// Reposition onto an existing segment holding `pages` complete pages
    pub fn resume(&mut self, term: u64, collection: u64, pages: u64) -> Result<()> {
        let path = segment_path(&self.dir, term, collection);
        let file = Self::open_append(&path)?;

        self.file = Some(file);
        self.term = term;
        self.collection = collection;
        self.seq = pages;
        Ok(())
    }

    /// Forget any open segment and return to the empty-log position
    pub fn reset(&mut self) {
        self.file = None;
        self.term = SequenceId::START.term;
        self.collection = SequenceId::START.collection;
        self.seq = SequenceId::START.seq;
    }

    /// Write one logical entry, splitting it across pages when needed.
    ///
    /// Returns the position after the entry's last page.
    pub fn append(&mut self, payload: &[u8]) -> Result<SequenceId> {
        if payload.len() <= PAGE_CAPACITY {
            self.append_page(payload, PageType::Whole)?;
            return Ok(self.position());
        }

        let mut chunks = payload.chunks(PAGE_CAPACITY).peekable();
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let page_type = if chunks.peek().is_none() {
                PageType::End
            } else if first {
                PageType::Start
            } else {
                PageType::Middle
            };
            self.append_page(chunk, page_type)?;
            first = false;
        }

        Ok(self.position())
    }

    /// Append a single page, rotating first if it would not fit
    pub fn append_page(&mut self, payload: &[u8], page_type: PageType) -> Result<()> {
        let page = encode_page(payload, page_type)?;
        self.ensure_capacity()?;

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| TandemError::WalWrite("no active segment".to_string()))?;
        file.write_all(&page)?;
        self.seq += 1;

        Ok(())
    }

    /// Close the active segment and open the first segment of `term`
    pub fn start_term(&mut self, term: u64) -> Result<()> {
        if term <= self.term {
            return Err(TandemError::WalWrite(format!(
                "new term {} must be greater than current term {}",
                term, self.term
            )));
        }

        self.sync()?;
        self.term = term;
        self.open_next_segment()
    }

    /// Force sync of the active segment
    pub fn sync(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Current tail position
    pub fn position(&self) -> SequenceId {
        SequenceId::new(self.term, self.collection, self.seq)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_capacity(&mut self) -> Result<()> {
        if self.file.is_none() {
            return self.open_next_segment();
        }

        let projected = (self.seq + 1) * PAGE_SIZE as u64;
        if self.seq > 0 && projected > self.max_file_size {
            self.sync()?;
            self.open_next_segment()?;
            tracing::info!(
                "Rotated WAL to segment term={} collection={}",
                self.term,
                self.collection
            );
        }

        Ok(())
    }

    fn open_next_segment(&mut self) -> Result<()> {
        // Drop the old handle before creating the next file
        self.file = None;

        let collection = self.collection + 1;
        let file = Self::open_append(&segment_path(&self.dir, self.term, collection))?;

        self.file = Some(file);
        self.collection = collection;
        self.seq = 0;
        Ok(())
    }

    fn open_append(path: &Path) -> Result<File> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(file)
    }
}
