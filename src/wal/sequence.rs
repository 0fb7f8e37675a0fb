//! WAL positions
//!
//! A `SequenceId` names a point in the log: the epoch (`term`), the segment
//! file (`collection`) and the number of pages written to that segment
//! (`seq`). Ordering is lexicographic over the three fields.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Total-order position in the write-ahead log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceId {
    /// Epoch; only changes on an external epoch change such as promotion
    pub term: u64,

    /// Segment file number; grows on every rotation and never resets
    pub collection: u64,

    /// Pages written to the segment so far
    pub seq: u64,
}

impl SequenceId {
    /// Position of an empty log: term 1, before the first segment
    pub const START: SequenceId = SequenceId::new(1, 0, 0);

    pub const fn new(term: u64, collection: u64, seq: u64) -> Self {
        Self {
            term,
            collection,
            seq,
        }
    }

    /// Three-way comparison: -1, 0 or 1
    pub fn compare(&self, other: &SequenceId) -> i32 {
        match self.cmp(other) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }

    /// The `(term, collection)` pair identifying the segment this position lives in
    pub fn segment(&self) -> (u64, u64) {
        (self.term, self.collection)
    }
}

impl Default for SequenceId {
    fn default() -> Self {
        Self::START
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.term, self.collection, self.seq)
    }
}
