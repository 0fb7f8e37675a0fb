//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append entries before any mutation is applied
//! - Fixed-size pages, each with its own CRC32
//! - Split large entries across Start/Middle/End pages
//! - Rotate segments at a configured size
//! - Repair torn tails and replay after a crash
//!
//! ## Disk Layout
//! ```text
//! {wal_dir}/
//!   ├── 00000000000000010000000000000001   (term 1, collection 1)
//!   ├── 00000000000000010000000000000002   (term 1, collection 2)
//!   └── ...
//!
//! Segment = [Page 4096][Page 4096][Page 4096]...
//! Record  = Whole | Start Middle* End | Start Middle* BrokenEnd (discarded)
//! ```

mod log;
mod page;
mod reader;
mod recovery;
mod segment;
mod sequence;
mod writer;

pub use log::WalLog;
pub use page::{decode_page, encode_page, PageType, PAGE_CAPACITY, PAGE_HEADER_SIZE, PAGE_SIZE};
pub use reader::{RecordAssembler, WalReader};
pub use recovery::{RecoveryResult, TailInfo, WalRecovery};
pub use segment::{list_segments, parse_segment_name, segment_name, segment_path, Segment};
pub use sequence::SequenceId;
pub use writer::WalWriter;
