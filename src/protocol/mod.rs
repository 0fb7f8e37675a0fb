//! Protocol Module
//!
//! Defines the wire protocol spoken between clients, peers and servers.
//!
//! ## Protocol Format (V1 - Framed Binary)
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Kind (1) │ Len (4)  │  argc + [len + arg]*        │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Commands (first argument, case-insensitive)
//! - PING                          → Status "PONG"
//! - GET key                       → Bulk value | Null
//! - SET key value                 → Status "OK"
//! - DEL key                       → Status "OK"
//! - REPLICATOR.ROLE [node]        → Integer (1 = primary, 2 = standby)
//! - REPLICATOR.SYNC_REG node seq  → Bulk {snapshot, incremental logs}
//! - REPLICATOR.SHIP record        → Status "OK"
//! - REPLICATOR.PROMOTE            → Status "OK"
//!
//! ### Reply Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Type (1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Reply Types
//! - 0x00: STATUS
//! - 0x01: NULL
//! - 0x02: ERROR
//! - 0x03: INTEGER
//! - 0x04: BULK

mod codec;
mod command;
mod response;

pub use codec::{
    decode_reply, decode_request, encode_reply, encode_request, ensure_payload_fits, read_reply,
    read_request, write_reply, write_request, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use command::Request;
pub use response::{Reply, ReplyType};
