//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Kind (1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! Payload: argc (4) + [arg_len (4) + arg]*
//! ```
//!
//! ### Reply Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Type (1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! Status/Error: UTF-8 text   Integer: i64 BE   Bulk: raw bytes   Null: empty
//! ```

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, TandemError};

use super::{Reply, Request};

/// Header size: 1 byte kind/type + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (512 MB); snapshots travel as a single bulk reply
pub const MAX_PAYLOAD_SIZE: u32 = 512 * 1024 * 1024;

/// Frame kind marking a request
pub const REQUEST_KIND: u8 = 0x2A;

// =============================================================================
// Request Encoding/Decoding
// =============================================================================

/// Encode a request to bytes
///
/// Format: kind (1) + payload_len (4) + payload
pub fn encode_request(request: &Request) -> Bytes {
    let args = request.args();
    let payload_len = request_payload_len(request);

    let mut message = BytesMut::with_capacity(HEADER_SIZE + payload_len);
    message.put_u8(REQUEST_KIND);
    message.put_u32(payload_len as u32);
    message.put_u32(args.len() as u32);
    for arg in args {
        message.put_u32(arg.len() as u32);
        message.put_slice(arg);
    }

    message.freeze()
}

/// Decode a request from bytes
pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    let (kind, payload) = split_frame(bytes)?;
    if kind != REQUEST_KIND {
        return Err(TandemError::Protocol(format!(
            "Unknown request kind: 0x{:02x}",
            kind
        )));
    }

    let mut rest = payload;
    let argc = take_u32(&mut rest, "argument count")?;
    if argc == 0 {
        return Err(TandemError::Protocol("Empty request".to_string()));
    }

    let mut args = Vec::with_capacity((argc as usize).min(64));
    for i in 0..argc {
        let len = take_u32(&mut rest, "argument length")? as usize;
        if rest.remaining() < len {
            return Err(TandemError::Protocol(format!(
                "Argument {}: incomplete (expected {}, got {})",
                i,
                len,
                rest.remaining()
            )));
        }
        args.push(rest[..len].to_vec());
        rest.advance(len);
    }

    if !rest.is_empty() {
        return Err(TandemError::Protocol(format!(
            "Request has {} trailing bytes",
            rest.len()
        )));
    }

    Ok(Request::from_args(args))
}

// =============================================================================
// Reply Encoding/Decoding
// =============================================================================

/// Encode a reply to bytes
///
/// Format: type (1) + payload_len (4) + payload
pub fn encode_reply(reply: &Reply) -> Bytes {
    let mut message = BytesMut::with_capacity(HEADER_SIZE + 16);
    message.put_u8(reply.reply_type() as u8);

    match reply {
        Reply::Status(s) | Reply::Error(s) => {
            message.put_u32(s.len() as u32);
            message.put_slice(s.as_bytes());
        }
        Reply::Null => message.put_u32(0),
        Reply::Integer(i) => {
            message.put_u32(8);
            message.put_i64(*i);
        }
        Reply::Bulk(b) => {
            message.put_u32(b.len() as u32);
            message.put_slice(b);
        }
    }

    message.freeze()
}

/// Decode a reply from bytes
pub fn decode_reply(bytes: &[u8]) -> Result<Reply> {
    let (reply_type, payload) = split_frame(bytes)?;

    let text = |payload: &[u8]| {
        String::from_utf8(payload.to_vec())
            .map_err(|_| TandemError::Protocol("Reply text is not valid UTF-8".to_string()))
    };

    match reply_type {
        0x00 => Ok(Reply::Status(text(payload)?)),
        0x01 => {
            if !payload.is_empty() {
                return Err(TandemError::Protocol(format!(
                    "Null reply: unexpected payload of {} bytes",
                    payload.len()
                )));
            }
            Ok(Reply::Null)
        }
        0x02 => Ok(Reply::Error(text(payload)?)),
        0x03 => {
            if payload.len() != 8 {
                return Err(TandemError::Protocol(format!(
                    "Integer reply: expected 8 bytes, got {}",
                    payload.len()
                )));
            }
            let mut payload = payload;
            Ok(Reply::Integer(payload.get_i64()))
        }
        0x04 => Ok(Reply::Bulk(payload.to_vec())),
        _ => Err(TandemError::Protocol(format!(
            "Unknown reply type: 0x{:02x}",
            reply_type
        ))),
    }
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete request from a stream
///
/// Blocks until a complete request is received or an error occurs
pub fn read_request<R: Read>(reader: &mut R) -> Result<Request> {
    let message = read_frame(reader)?;
    decode_request(&message)
}

/// Write a request to a stream
pub fn write_request<W: Write>(writer: &mut W, request: &Request) -> Result<()> {
    ensure_payload_fits(request_payload_len(request))?;
    let bytes = encode_request(request);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a complete reply from a stream
pub fn read_reply<R: Read>(reader: &mut R) -> Result<Reply> {
    let message = read_frame(reader)?;
    decode_reply(&message)
}

/// Write a reply to a stream
///
/// An oversized reply is rejected before anything is written, so the stream
/// stays framed.
pub fn write_reply<W: Write>(writer: &mut W, reply: &Reply) -> Result<()> {
    ensure_payload_fits(reply_payload_len(reply))?;
    let bytes = encode_reply(reply);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Fail if a payload of `len` bytes exceeds what a peer will accept
pub fn ensure_payload_fits(len: usize) -> Result<()> {
    if len > MAX_PAYLOAD_SIZE as usize {
        return Err(TandemError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            len, MAX_PAYLOAD_SIZE
        )));
    }
    Ok(())
}

// =============================================================================
// Private Helpers
// =============================================================================

/// Read header + payload into one buffer
fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    // Read header first
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    check_payload_len(payload_len)?;

    let mut message = vec![0u8; HEADER_SIZE + payload_len as usize];
    message[..HEADER_SIZE].copy_from_slice(&header);
    if payload_len > 0 {
        reader.read_exact(&mut message[HEADER_SIZE..])?;
    }

    Ok(message)
}

/// Validate the header and return (kind/type byte, payload)
fn split_frame(bytes: &[u8]) -> Result<(u8, &[u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(TandemError::Protocol(format!(
            "Incomplete header: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let payload_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    check_payload_len(payload_len)?;

    let total_len = HEADER_SIZE + payload_len as usize;
    if bytes.len() < total_len {
        return Err(TandemError::Protocol(format!(
            "Incomplete payload: expected {} bytes, got {}",
            total_len,
            bytes.len()
        )));
    }

    Ok((bytes[0], &bytes[HEADER_SIZE..total_len]))
}

fn check_payload_len(payload_len: u32) -> Result<()> {
    ensure_payload_fits(payload_len as usize)
}

fn request_payload_len(request: &Request) -> usize {
    4 + request.args().iter().map(|a| 4 + a.len()).sum::<usize>()
}

fn reply_payload_len(reply: &Reply) -> usize {
    match reply {
        Reply::Status(s) | Reply::Error(s) => s.len(),
        Reply::Null => 0,
        Reply::Integer(_) => 8,
        Reply::Bulk(b) => b.len(),
    }
}

fn take_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(TandemError::Protocol(format!("Missing {}", what)));
    }
    Ok(buf.get_u32())
}
