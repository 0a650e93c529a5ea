use std::io;
use std::path::PathBuf;

use chunkstage_file_ops::{FileOpsError, ensure_within, prune_empty_dirs, remove_file_if_exists};
use serde::Serialize;
use tracing::{info, warn};

use crate::UploadError;
use crate::locks::TargetGuard;

/// What a reclaim removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub removed_files: usize,
    pub pruned_dirs: usize,
}

/// Removes the staging state of assembled targets.
#[derive(Debug, Clone)]
pub struct Reclaimer {
    staging_root: PathBuf,
}

impl Reclaimer {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
        }
    }

    /// Deletes the guarded target's record and chunks, then prunes staging
    /// directories left empty, up to but excluding the staging root.
    ///
    /// The record goes first: once it is gone the upload no longer exists,
    /// whatever happens to the remaining files. Files of other targets in
    /// the same directory are left alone. A staging directory that is
    /// already gone counts as reclaimed.
    pub fn reclaim(&self, guard: &TargetGuard) -> Result<ReclaimReport, UploadError> {
        let target = guard.target();

        let dir = match ensure_within(&self.staging_root, target.staging_dir()) {
            Ok(dir) => dir,
            Err(FileOpsError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(ReclaimReport::default());
            }
            Err(FileOpsError::Io(e)) => return Err(UploadError::Io(e)),
            Err(FileOpsError::OutsideRoot(reason)) => {
                warn!(upload = %target.target(), reason = %reason, "refusing to reclaim");
                return Err(UploadError::InvalidIdentity(format!(
                    "staging directory of {} escapes the staging root",
                    target.target()
                )));
            }
        };

        let mut report = ReclaimReport::default();
        if remove_file_if_exists(&dir.join(target.record_name()))? {
            report.removed_files += 1;
        }

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !target.owns_staging_file(name) || !entry.file_type()?.is_file() {
                continue;
            }
            if remove_file_if_exists(&entry.path())? {
                report.removed_files += 1;
            }
        }

        // Canonical form, so the stop check matches the canonical `dir`.
        let root = std::fs::canonicalize(&self.staging_root)?;
        report.pruned_dirs = prune_empty_dirs(&dir, &root);

        info!(
            upload = %target.target(),
            removed_files = report.removed_files,
            pruned_dirs = report.pruned_dirs,
            "staging reclaimed"
        );
        Ok(report)
    }
}
