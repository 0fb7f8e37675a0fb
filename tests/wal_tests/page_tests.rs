//! Tests for the WAL page codec
//!
//! These tests verify:
//! - Fixed page size and header layout
//! - CRC32 detection of corrupted bytes anywhere in the page
//! - Rejection of oversized payloads and malformed headers

use tandemkv::wal::{decode_page, encode_page, PageType, PAGE_CAPACITY, PAGE_HEADER_SIZE, PAGE_SIZE};
use tandemkv::TandemError;

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_page_is_fixed_size() {
    let page = encode_page(b"hello", PageType::Whole).unwrap();
    assert_eq!(page.len(), PAGE_SIZE);
    assert_eq!(PAGE_CAPACITY, PAGE_SIZE - PAGE_HEADER_SIZE);
}

#[test]
fn test_header_layout() {
    let page = encode_page(b"abc", PageType::Start).unwrap();

    // High nibble marks a written page, low nibble carries the type
    assert_eq!(page[0], 0b1010_0000 | 0b1010);
    assert_eq!(u16::from_be_bytes([page[1], page[2]]), 3);
    assert_eq!(page[7], 0);
    assert_eq!(&page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 3], b"abc");
    assert!(page[PAGE_HEADER_SIZE + 3..].iter().all(|&b| b == 0));
}

#[test]
fn test_decode_returns_type_and_payload() {
    for page_type in [
        PageType::Whole,
        PageType::Start,
        PageType::Middle,
        PageType::End,
        PageType::BrokenEnd,
    ] {
        let page = encode_page(b"payload", page_type).unwrap();
        let (decoded_type, payload) = decode_page(&page).unwrap();
        assert_eq!(decoded_type, page_type);
        assert_eq!(payload, b"payload");
    }
}

#[test]
fn test_empty_and_full_payloads() {
    let empty = encode_page(&[], PageType::BrokenEnd).unwrap();
    assert_eq!(decode_page(&empty).unwrap().1.len(), 0);

    let full = vec![0x5A; PAGE_CAPACITY];
    let page = encode_page(&full, PageType::Whole).unwrap();
    assert_eq!(decode_page(&page).unwrap().1, full.as_slice());
}

#[test]
fn test_oversized_payload_rejected() {
    let result = encode_page(&vec![0u8; PAGE_CAPACITY + 1], PageType::Whole);
    assert!(matches!(result, Err(TandemError::WalWrite(_))));
}

#[test]
fn test_dangling_page_types() {
    assert!(PageType::Start.is_dangling());
    assert!(PageType::Middle.is_dangling());
    assert!(!PageType::Whole.is_dangling());
    assert!(!PageType::End.is_dangling());
    assert!(!PageType::BrokenEnd.is_dangling());
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_corrupted_payload_byte_detected() {
    let mut page = encode_page(b"some data", PageType::Whole).unwrap();
    page[PAGE_HEADER_SIZE + 2] ^= 0xFF;

    let err = decode_page(&page).unwrap_err();
    assert!(matches!(err, TandemError::WalCorruption(ref msg) if msg.contains("crc32")));
}

#[test]
fn test_corrupted_padding_byte_detected() {
    let mut page = encode_page(b"x", PageType::Whole).unwrap();
    page[PAGE_SIZE - 1] = 1;

    assert!(matches!(decode_page(&page), Err(TandemError::WalCorruption(_))));
}

#[test]
fn test_corrupted_length_field_detected() {
    let mut page = encode_page(b"x", PageType::Whole).unwrap();
    page[2] = 200;

    assert!(matches!(decode_page(&page), Err(TandemError::WalCorruption(_))));
}

#[test]
fn test_zeroed_page_rejected() {
    let page = vec![0u8; PAGE_SIZE];
    assert!(matches!(decode_page(&page), Err(TandemError::WalCorruption(_))));
}

#[test]
fn test_short_buffer_rejected() {
    let page = encode_page(b"x", PageType::Whole).unwrap();
    assert!(matches!(
        decode_page(&page[..PAGE_SIZE - 1]),
        Err(TandemError::WalCorruption(_))
    ));
}
