//! Persisted bookkeeping of received chunk indices.
//!
//! One JSON record per target, next to its chunks:
//!
//! ```json
//! {"total_chunks": 3, "received_chunks": [0, 2]}
//! ```
//!
//! The record is only updated after the chunk bytes are on disk, and is
//! always replaced atomically.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use chunkstage_file_ops::write_atomic;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::identity::ResolvedTarget;
use crate::locks::TargetGuard;
use crate::{UploadError, check_chunk};

/// Received indices of one target plus its declared chunk count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub total_chunks: u32,
    #[serde(default)]
    pub received_chunks: BTreeSet<u32>,
}

impl CompletionRecord {
    pub fn new(total_chunks: u32) -> Self {
        Self {
            total_chunks,
            received_chunks: BTreeSet::new(),
        }
    }

    pub fn received_count(&self) -> u32 {
        self.received_chunks.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.received_count() == self.total_chunks
    }

    /// Indices not yet received, ascending.
    pub fn missing(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received_chunks.contains(i))
            .collect()
    }

    fn is_consistent(&self) -> bool {
        self.total_chunks > 0
            && self
                .received_chunks
                .last()
                .is_none_or(|&max| max < self.total_chunks)
    }
}

/// Outcome of recording one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub all_received: bool,
    pub received_count: u32,
}

/// Why a record on disk could not be used.
#[derive(Debug)]
pub(crate) enum RecordError {
    Io(io::Error),
    Corrupt(String),
}

/// Reads a record without any locking. `Ok(None)` when absent.
///
/// Records are replaced atomically, so an unlocked reader sees either the
/// previous or the next complete version.
pub(crate) fn read_record(path: &Path) -> Result<Option<CompletionRecord>, RecordError> {
    let content = match std::fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(RecordError::Io(e)),
    };

    let record: CompletionRecord =
        serde_json::from_slice(&content).map_err(|e| RecordError::Corrupt(e.to_string()))?;
    if !record.is_consistent() {
        return Err(RecordError::Corrupt(format!(
            "indices {:?} do not fit {} chunks",
            record.received_chunks, record.total_chunks
        )));
    }
    Ok(Some(record))
}

/// Owner of the completion records.
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    sync_writes: bool,
}

impl CompletionTracker {
    pub fn new(sync_writes: bool) -> Self {
        Self { sync_writes }
    }

    /// Loads the record of the guarded target.
    ///
    /// A corrupted or unreadable record is reported as absent: the upload
    /// rebuilds from empty and already staged chunks are simply resent.
    pub fn load(&self, guard: &TargetGuard) -> Option<CompletionRecord> {
        let target = guard.target();
        match read_record(&target.record_path()) {
            Ok(record) => record,
            Err(RecordError::Corrupt(reason)) => {
                warn!(
                    upload = %target.target(),
                    reason = %reason,
                    "corrupt completion record, rebuilding from empty"
                );
                None
            }
            Err(RecordError::Io(e)) => {
                warn!(
                    upload = %target.target(),
                    error = %e,
                    "unreadable completion record, rebuilding from empty"
                );
                None
            }
        }
    }

    /// Chunk count declared by earlier chunks, if any.
    pub fn declared_total(&self, guard: &TargetGuard) -> Option<u32> {
        self.load(guard).map(|r| r.total_chunks)
    }

    /// Adds `index` to the record and persists it.
    ///
    /// Must only be called once the chunk bytes are durably staged.
    pub fn record_received(
        &self,
        guard: &TargetGuard,
        index: u32,
        total: u32,
    ) -> Result<Progress, UploadError> {
        let existing = self.load(guard);
        check_chunk(index, total, existing.as_ref().map(|r| r.total_chunks))?;

        let mut record = existing.unwrap_or_else(|| CompletionRecord::new(total));
        if record.received_chunks.insert(index) {
            self.persist(guard.target(), &record)?;
        } else {
            debug!(upload = %guard.target().target(), index, "chunk already recorded");
        }

        Ok(Progress {
            all_received: record.is_complete(),
            received_count: record.received_count(),
        })
    }

    /// Removes `indices` from the record, e.g. after their files went
    /// missing. The record is rewritten once.
    pub fn forget(&self, guard: &TargetGuard, indices: &[u32]) -> Result<(), UploadError> {
        let Some(mut record) = self.load(guard) else {
            return Ok(());
        };
        let before = record.received_chunks.len();
        for index in indices {
            record.received_chunks.remove(index);
        }
        if record.received_chunks.len() != before {
            self.persist(guard.target(), &record)?;
        }
        Ok(())
    }

    fn persist(&self, target: &ResolvedTarget, record: &CompletionRecord) -> io::Result<()> {
        let json = serde_json::to_vec(record)?;
        write_atomic(&target.record_path(), &json, self.sync_writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IdentityResolver, TargetLocks};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        resolver: IdentityResolver,
        locks: Arc<TargetLocks>,
        tracker: CompletionTracker,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let resolver = IdentityResolver::new(dir.path().join("staging"), dir.path().join("final"));
        Fixture {
            _dir: dir,
            resolver,
            locks: Arc::new(TargetLocks::new()),
            tracker: CompletionTracker::new(false),
        }
    }

    impl Fixture {
        fn guard(&self) -> TargetGuard {
            let target = self.resolver.resolve("s", "dir", "f.bin").unwrap();
            std::fs::create_dir_all(target.staging_dir()).unwrap();
            self.locks.lock_blocking(target)
        }
    }

    #[test]
    fn records_until_complete() {
        let f = fixture();
        let guard = f.guard();

        let p = f.tracker.record_received(&guard, 2, 3).unwrap();
        assert_eq!(p, Progress { all_received: false, received_count: 1 });
        let p = f.tracker.record_received(&guard, 0, 3).unwrap();
        assert_eq!(p.received_count, 2);
        let p = f.tracker.record_received(&guard, 1, 3).unwrap();
        assert!(p.all_received);
        assert_eq!(p.received_count, 3);
    }

    #[test]
    fn duplicate_index_counts_once() {
        let f = fixture();
        let guard = f.guard();

        f.tracker.record_received(&guard, 0, 2).unwrap();
        let p = f.tracker.record_received(&guard, 0, 2).unwrap();
        assert_eq!(p.received_count, 1);
        assert!(!p.all_received);
    }

    #[test]
    fn record_format_on_disk() {
        let f = fixture();
        let guard = f.guard();
        f.tracker.record_received(&guard, 1, 3).unwrap();
        f.tracker.record_received(&guard, 0, 3).unwrap();

        let raw = std::fs::read_to_string(guard.target().record_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["total_chunks"], 3);
        assert_eq!(value["received_chunks"], serde_json::json!([0, 1]));
    }

    #[test]
    fn total_mismatch_rejected_and_first_declaration_stands() {
        let f = fixture();
        let guard = f.guard();
        f.tracker.record_received(&guard, 0, 2).unwrap();

        let err = f.tracker.record_received(&guard, 1, 3).unwrap_err();
        assert!(matches!(
            err,
            UploadError::TotalCountMismatch { declared: 2, requested: 3 }
        ));
        assert_eq!(f.tracker.declared_total(&guard), Some(2));
        assert_eq!(f.tracker.load(&guard).unwrap().received_count(), 1);
    }

    #[test]
    fn out_of_range_rejected() {
        let f = fixture();
        let guard = f.guard();
        assert!(matches!(
            f.tracker.record_received(&guard, 3, 3),
            Err(UploadError::ChunkIndexOutOfRange { .. })
        ));
        assert!(f.tracker.load(&guard).is_none());
    }

    #[test]
    fn corrupt_record_treated_as_empty() {
        let f = fixture();
        let guard = f.guard();
        std::fs::write(guard.target().record_path(), b"{not json").unwrap();

        assert!(f.tracker.load(&guard).is_none());
        let p = f.tracker.record_received(&guard, 0, 2).unwrap();
        assert_eq!(p.received_count, 1);
        assert_eq!(f.tracker.declared_total(&guard), Some(2));
    }

    #[test]
    fn inconsistent_record_treated_as_empty() {
        let f = fixture();
        let guard = f.guard();
        std::fs::write(
            guard.target().record_path(),
            br#"{"total_chunks":2,"received_chunks":[0,5]}"#,
        )
        .unwrap();
        assert!(f.tracker.load(&guard).is_none());

        std::fs::write(
            guard.target().record_path(),
            br#"{"total_chunks":0,"received_chunks":[]}"#,
        )
        .unwrap();
        assert!(f.tracker.load(&guard).is_none());
    }

    #[test]
    fn legacy_record_without_total_is_corrupt() {
        // The old format only stored received indices.
        let f = fixture();
        let guard = f.guard();
        std::fs::write(guard.target().record_path(), br#"{"received_chunks":[0,1]}"#).unwrap();
        assert!(f.tracker.load(&guard).is_none());
    }

    #[test]
    fn forget_removes_indices() {
        let f = fixture();
        let guard = f.guard();
        for i in 0..4 {
            f.tracker.record_received(&guard, i, 4).unwrap();
        }
        f.tracker.forget(&guard, &[1]).unwrap();

        let record = f.tracker.load(&guard).unwrap();
        assert_eq!(record.missing(), vec![1]);
        assert!(!record.is_complete());

        // Indices not on record are ignored.
        f.tracker.forget(&guard, &[0, 1, 3]).unwrap();
        let record = f.tracker.load(&guard).unwrap();
        assert_eq!(record.missing(), vec![0, 1, 3]);
        assert_eq!(record.total_chunks, 4);

        // Forgetting on an absent record is a no-op.
        std::fs::remove_file(guard.target().record_path()).unwrap();
        f.tracker.forget(&guard, &[0]).unwrap();
        assert!(f.tracker.load(&guard).is_none());
    }

    #[test]
    fn survives_new_tracker_instance() {
        let f = fixture();
        {
            let guard = f.guard();
            f.tracker.record_received(&guard, 0, 2).unwrap();
        }

        let restarted = CompletionTracker::new(true);
        let guard = f.guard();
        let p = restarted.record_received(&guard, 1, 2).unwrap();
        assert!(p.all_received);
    }

    #[test]
    fn concurrent_distinct_indices_all_recorded() {
        let f = fixture();
        let target = f.resolver.resolve("s", "dir", "f.bin").unwrap();
        std::fs::create_dir_all(target.staging_dir()).unwrap();
        let tracker = Arc::new(f.tracker.clone());

        let total = 32;
        let handles: Vec<_> = (0..total)
            .map(|i| {
                let locks = Arc::clone(&f.locks);
                let tracker = Arc::clone(&tracker);
                let target = target.clone();
                std::thread::spawn(move || {
                    let guard = locks.lock_blocking(target);
                    tracker.record_received(&guard, i, total).unwrap()
                })
            })
            .collect();

        let completions = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|p| p.all_received)
            .count();
        assert_eq!(completions, 1);

        let guard = f.locks.lock_blocking(target);
        let record = tracker.load(&guard).unwrap();
        assert_eq!(record.received_count(), total);
    }

    #[test]
    fn missing_lists_gaps() {
        let mut record = CompletionRecord::new(4);
        record.received_chunks.extend([0, 2]);
        assert_eq!(record.missing(), vec![1, 3]);
    }
}
