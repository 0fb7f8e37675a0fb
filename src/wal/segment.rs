//! Segment file naming and discovery
//!
//! One file per `(term, collection)`, named `"%016x%016x"` so that a plain
//! lexicographic sort of file names is also a sort by position.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

const NAME_LEN: usize = 32;

/// A segment file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub term: u64,
    pub collection: u64,
    pub path: PathBuf,
}

/// File name for a segment
pub fn segment_name(term: u64, collection: u64) -> String {
    format!("{:016x}{:016x}", term, collection)
}

/// Full path for a segment inside `dir`
pub fn segment_path(dir: &Path, term: u64, collection: u64) -> PathBuf {
    dir.join(segment_name(term, collection))
}

/// Parse `(term, collection)` from a segment file name
/// "00000000000000010000000000000002" → Some((1, 2))
pub fn parse_segment_name(name: &str) -> Option<(u64, u64)> {
    if name.len() != NAME_LEN || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let term = u64::from_str_radix(&name[..16], 16).ok()?;
    let collection = u64::from_str_radix(&name[16..], 16).ok()?;
    if term == 0 || collection == 0 {
        return None;
    }
    Some((term, collection))
}

/// List segment files in `dir`, oldest first. Unknown files are skipped.
pub fn list_segments(dir: &Path) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let name = entry.file_name();
        match name.to_str().and_then(parse_segment_name) {
            Some((term, collection)) => segments.push(Segment {
                term,
                collection,
                path,
            }),
            None => {
                tracing::warn!("Ignoring unknown file in WAL directory: {}", path.display());
            }
        }
    }

    segments.sort_by_key(|s| (s.term, s.collection));
    Ok(segments)
}
