//! WAL facade
//!
//! `WalLog` owns the writer behind a single exclusive lock. Writes,
//! initialization, replay and position queries all serialize on it, so
//! pages from concurrent writers never interleave.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::{WalConfig, WalSyncStrategy};
use crate::error::{Result, TandemError};

use super::page::PageType;
use super::reader::{RecordAssembler, WalReader};
use super::recovery::WalRecovery;
use super::segment::{list_segments, Segment};
use super::writer::WalWriter;
use super::SequenceId;

/// Background fsync worker and the channel that stops it
struct SyncWorker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Append-only, page-structured, crash-recoverable log
pub struct WalLog {
    dir: PathBuf,
    sync_strategy: WalSyncStrategy,

    /// Exclusive access to the active segment
    writer: Arc<Mutex<WalWriter>>,

    /// Set by writes, cleared by the background sync
    dirty: Arc<AtomicBool>,

    initialized: AtomicBool,
    syncer: Mutex<Option<SyncWorker>>,
}

impl WalLog {
    /// Create a log over `dir`. Nothing touches the disk until `initialize`.
    pub fn new(dir: &Path, config: &WalConfig) -> Self {
        Self {
            dir: dir.to_path_buf(),
            sync_strategy: config.sync_strategy,
            writer: Arc::new(Mutex::new(WalWriter::new(dir, config.max_file_size))),
            dirty: Arc::new(AtomicBool::new(false)),
            initialized: AtomicBool::new(false),
            syncer: Mutex::new(None),
        }
    }

    /// Open the newest segment, repair a torn tail and position the cursor
    /// at end of file. An empty directory yields `SequenceId::START`.
    pub fn initialize(&self) -> Result<SequenceId> {
        let mut writer = self.writer.lock();

        fs::create_dir_all(&self.dir)?;
        let segments = list_segments(&self.dir)?;

        let position = match segments.split_last() {
            None => {
                writer.reset();
                SequenceId::START
            }
            Some((newest, older)) => {
                let previous = older.last().map(|s| s.path.as_path());
                let result = WalRecovery::recover(&newest.path, previous)?;

                writer.resume(newest.term, newest.collection, result.pages)?;
                if result.needs_broken_end {
                    tracing::warn!(
                        "Closing torn record in segment {} with a broken-end page",
                        newest.path.display()
                    );
                    writer.append_page(&[], PageType::BrokenEnd)?;
                    writer.sync()?;
                }
                writer.position()
            }
        };

        if !self.initialized.swap(true, Ordering::AcqRel) {
            self.start_sync_worker()?;
        }

        tracing::info!(
            "WAL initialized at {} ({} segment(s))",
            position,
            segments.len()
        );
        Ok(position)
    }

    /// Durably append one logical entry and return the position after it
    pub fn write_entry(&self, payload: &[u8]) -> Result<SequenceId> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(TandemError::WalWrite("WAL is not initialized".to_string()));
        }

        let mut writer = self.writer.lock();
        let position = writer.append(payload)?;

        match self.sync_strategy {
            WalSyncStrategy::EveryWrite => writer.sync()?,
            WalSyncStrategy::Interval { .. } => self.dirty.store(true, Ordering::Release),
        }

        Ok(position)
    }

    /// Replay every record from the segment containing `from` to the tail.
    ///
    /// `apply` receives each complete record together with the position
    /// right after its last page. Torn records closed by a BrokenEnd page
    /// are skipped. Returns the tail position.
    pub fn replay_incomplete<F>(&self, from: SequenceId, mut apply: F) -> Result<SequenceId>
    where
        F: FnMut(SequenceId, &[u8]) -> Result<()>,
    {
        let writer = self.writer.lock();
        let tail = writer.position();

        if from == tail {
            return Ok(tail);
        }
        if from > tail {
            return Err(TandemError::AheadOfTail {
                requested: from,
                tail,
            });
        }

        let segments = list_segments(&self.dir)?;
        if segments.is_empty() {
            return Ok(tail);
        }
        let start = Self::replay_start(&segments, from)?;

        let mut assembler = RecordAssembler::new();
        for segment in &segments[start..] {
            let mut reader = WalReader::open(&segment.path)?;
            while let Some((page_type, data)) = reader.next_page()? {
                let record = assembler.push(page_type, data)?;
                if let Some(record) = record {
                    let position =
                        SequenceId::new(segment.term, segment.collection, reader.pages_read());
                    apply(position, &record)?;
                }
            }
        }

        Ok(tail)
    }

    /// In-memory tail position
    pub fn current_sequence(&self) -> SequenceId {
        self.writer.lock().position()
    }

    /// Begin a new epoch: the next page lands in the first segment of `term`
    pub fn start_term(&self, term: u64) -> Result<SequenceId> {
        let mut writer = self.writer.lock();
        writer.start_term(term)?;
        tracing::info!("WAL entered term {}", term);
        Ok(writer.position())
    }

    /// Force sync of the active segment
    pub fn sync(&self) -> Result<()> {
        self.dirty.store(false, Ordering::Release);
        self.writer.lock().sync()
    }

    /// Directory holding the segment files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Index of the segment replay starts from
    fn replay_start(segments: &[Segment], from: SequenceId) -> Result<usize> {
        let oldest = &segments[0];
        let oldest_id = SequenceId::new(oldest.term, oldest.collection, 0);

        // The empty-log position means "from the very beginning"
        if from.collection == SequenceId::START.collection {
            return if oldest.collection == 1 {
                Ok(0)
            } else {
                Err(TandemError::InsufficientHistory {
                    requested: from,
                    oldest: oldest_id,
                })
            };
        }

        segments
            .iter()
            .rposition(|s| (s.term, s.collection) <= from.segment())
            .ok_or(TandemError::InsufficientHistory {
                requested: from,
                oldest: oldest_id,
            })
    }

    fn start_sync_worker(&self) -> Result<()> {
        let interval = match self.sync_strategy {
            WalSyncStrategy::Interval { millis } => Duration::from_millis(millis),
            WalSyncStrategy::EveryWrite => return Ok(()),
        };

        let (stop, stopped) = channel::bounded::<()>(0);
        let writer = Arc::clone(&self.writer);
        let dirty = Arc::clone(&self.dirty);

        let handle = thread::Builder::new()
            .name("wal-sync".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if dirty.swap(false, Ordering::AcqRel) {
                            if let Err(e) = writer.lock().sync() {
                                tracing::error!("WAL background sync failed: {}", e);
                            }
                        }
                    }
                    _ => break,
                }
            })?;

        *self.syncer.lock() = Some(SyncWorker { stop, handle });
        Ok(())
    }
}

impl Drop for WalLog {
    fn drop(&mut self) {
        if let Some(worker) = self.syncer.lock().take() {
            drop(worker.stop);
            let _ = worker.handle.join();
        }
        if let Err(e) = self.writer.lock().sync() {
            tracing::error!("WAL final sync failed: {}", e);
        }
    }
}
