//! WAL Reader
//!
//! Reads pages from segment files and reassembles split records.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{Result, TandemError};

use super::page::{decode_page, PageType, PAGE_SIZE};

/// Sequential page reader over one segment file
pub struct WalReader {
    reader: BufReader<File>,
    buf: Vec<u8>,
    pages_read: u64,
}

impl WalReader {
    /// Open a segment file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            buf: vec![0u8; PAGE_SIZE],
            pages_read: 0,
        })
    }

    /// Read and validate the next page.
    ///
    /// Returns `Ok(None)` at a clean end of file. A trailing partial page is
    /// reported as corruption; recovery trims those before replay runs.
    pub fn next_page(&mut self) -> Result<Option<(PageType, &[u8])>> {
        let filled = read_full(&mut self.reader, &mut self.buf)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < PAGE_SIZE {
            return Err(TandemError::WalCorruption(format!(
                "truncated page {} ({} of {} bytes)",
                self.pages_read, filled, PAGE_SIZE
            )));
        }

        self.pages_read += 1;
        decode_page(&self.buf).map(Some)
    }

    /// Number of complete pages returned so far
    pub fn pages_read(&self) -> u64 {
        self.pages_read
    }
}

/// Fill `buf` from `reader`, returning how many bytes were read before EOF
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Rebuilds logical records from a stream of pages.
///
/// A replay window can begin in the middle of a record that was split
/// across a rotation; continuation pages seen before the first Whole/Start
/// page are skipped. After that point the page chain must be well formed.
pub struct RecordAssembler {
    pending: Option<Vec<u8>>,
    synced: bool,
}

impl RecordAssembler {
    pub fn new() -> Self {
        Self {
            pending: None,
            synced: false,
        }
    }

    /// Feed one page; returns a record when the page completes one
    pub fn push(&mut self, page_type: PageType, data: &[u8]) -> Result<Option<Vec<u8>>> {
        match page_type {
            PageType::Whole => {
                self.synced = true;
                if self.pending.take().is_some() {
                    return Err(TandemError::WalCorruption(
                        "whole page inside an open split record".to_string(),
                    ));
                }
                Ok(Some(data.to_vec()))
            }
            PageType::Start => {
                self.synced = true;
                if self.pending.is_some() {
                    return Err(TandemError::WalCorruption(
                        "start page inside an open split record".to_string(),
                    ));
                }
                self.pending = Some(data.to_vec());
                Ok(None)
            }
            PageType::Middle | PageType::End => match self.pending.as_mut() {
                Some(buf) => {
                    buf.extend_from_slice(data);
                    if page_type == PageType::End {
                        Ok(self.pending.take())
                    } else {
                        Ok(None)
                    }
                }
                None if !self.synced => Ok(None),
                None => Err(TandemError::WalCorruption(format!(
                    "{:?} page without a start page",
                    page_type
                ))),
            },
            PageType::BrokenEnd => {
                if let Some(discarded) = self.pending.take() {
                    tracing::debug!(
                        "Discarding torn record of {} bytes closed by broken-end page",
                        discarded.len()
                    );
                }
                Ok(None)
            }
        }
    }
}

impl Default for RecordAssembler {
    fn default() -> Self {
        Self::new()
    }
}
