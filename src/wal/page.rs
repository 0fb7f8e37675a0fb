//! WAL page codec
//!
//! Every page is exactly `PAGE_SIZE` bytes and carries its own checksum:
//!
//! ```text
//! ┌──────────────┬──────────┬──────────┬──────────┬──────────────┬─────────┐
//! │ Header|Type  │ Len (2)  │ CRC (4)  │ Rsvd (1) │ Payload      │ Padding │
//! │     (1)      │   BE     │   BE     │          │ (Len bytes)  │ (zeros) │
//! └──────────────┴──────────┴──────────┴──────────┴──────────────┴─────────┘
//! ```
//!
//! The CRC32 covers the whole page with the CRC field zeroed.

use crc32fast::Hasher;

use crate::error::{Result, TandemError};

/// Size of one WAL page on disk
pub const PAGE_SIZE: usize = 4096;

/// Header bytes in front of every payload
pub const PAGE_HEADER_SIZE: usize = 8;

/// Largest payload a single page can hold
pub const PAGE_CAPACITY: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// High nibble marking a written page
const PAGE_MARKER: u8 = 0b1010_0000;

/// Low nibble carrying the page type
const TYPE_MASK: u8 = 0b0000_1111;

const CRC_RANGE: std::ops::Range<usize> = 3..7;

/// Role of a page within a logical record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// The record fits in this one page
    Whole = 0b1001,
    /// First page of a split record
    Start = 0b1010,
    /// Continuation of a split record
    Middle = 0b1011,
    /// Last page of a split record
    End = 0b1100,
    /// Written at recovery to close a torn split record; the record is discarded
    BrokenEnd = 0b1101,
}

impl PageType {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b1001 => Some(PageType::Whole),
            0b1010 => Some(PageType::Start),
            0b1011 => Some(PageType::Middle),
            0b1100 => Some(PageType::End),
            0b1101 => Some(PageType::BrokenEnd),
            _ => None,
        }
    }

    /// True for pages that leave a split record open
    pub fn is_dangling(self) -> bool {
        matches!(self, PageType::Start | PageType::Middle)
    }
}

/// Build a full page around `payload`
pub fn encode_page(payload: &[u8], page_type: PageType) -> Result<Vec<u8>> {
    if payload.len() > PAGE_CAPACITY {
        return Err(TandemError::WalWrite(format!(
            "page payload of {} bytes exceeds capacity {}",
            payload.len(),
            PAGE_CAPACITY
        )));
    }

    let mut page = vec![0u8; PAGE_SIZE];
    page[0] = PAGE_MARKER | page_type as u8;
    page[1..3].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + payload.len()].copy_from_slice(payload);

    let crc = page_checksum(&page);
    page[CRC_RANGE].copy_from_slice(&crc.to_be_bytes());

    Ok(page)
}

/// Validate a page and return its type and payload
pub fn decode_page(page: &[u8]) -> Result<(PageType, &[u8])> {
    if page.len() != PAGE_SIZE {
        return Err(TandemError::WalCorruption(format!(
            "page is {} bytes, expected {}",
            page.len(),
            PAGE_SIZE
        )));
    }

    let stored = u32::from_be_bytes([page[3], page[4], page[5], page[6]]);
    if stored != page_checksum(page) {
        return Err(TandemError::WalCorruption("page crc32 mismatch".to_string()));
    }

    let len = u16::from_be_bytes([page[1], page[2]]) as usize;
    if len + PAGE_HEADER_SIZE > PAGE_SIZE {
        return Err(TandemError::WalCorruption(format!(
            "page length field {} exceeds page",
            len
        )));
    }

    let page_type = PageType::from_bits(page[0] & TYPE_MASK).ok_or_else(|| {
        TandemError::WalCorruption(format!("unknown page type byte 0x{:02x}", page[0]))
    })?;

    Ok((page_type, &page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + len]))
}

/// CRC32 of the page with the checksum field treated as zero
fn page_checksum(page: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&page[..CRC_RANGE.start]);
    hasher.update(&[0u8; 4]);
    hasher.update(&page[CRC_RANGE.end..]);
    hasher.finalize()
}
