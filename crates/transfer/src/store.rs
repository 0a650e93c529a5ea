use std::io;
use std::path::{Path, PathBuf};

use chunkstage_file_ops::write_atomic;
use tracing::debug;

use crate::identity::ResolvedTarget;
use crate::locks::TargetGuard;
use crate::{UploadError, check_chunk};

/// A chunk that is durably on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedChunk {
    pub index: u32,
    pub size: u64,
    pub path: PathBuf,
}

/// Durable staging area for chunk bytes.
///
/// Every chunk index has its own file, replaced atomically on each write, so
/// concurrent or repeated writes of one index never corrupt each other.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    sync_writes: bool,
}

impl ChunkStore {
    pub fn new(sync_writes: bool) -> Self {
        Self { sync_writes }
    }

    /// Writes chunk `index` of the guarded target.
    ///
    /// `declared` is the total announced by earlier chunks of the target, if
    /// any. Nothing is written when the chunk is rejected.
    pub fn stage(
        &self,
        guard: &TargetGuard,
        index: u32,
        total: u32,
        declared: Option<u32>,
        bytes: &[u8],
    ) -> Result<StagedChunk, UploadError> {
        check_chunk(index, total, declared)?;

        let target = guard.target();
        let path = target.chunk_path(index);
        self.write_chunk(target.staging_dir(), &path, bytes)
            .map_err(UploadError::ChunkWriteFailed)?;

        debug!(
            upload = %target.target(),
            index,
            total,
            size = bytes.len(),
            "chunk staged"
        );

        Ok(StagedChunk {
            index,
            size: bytes.len() as u64,
            path,
        })
    }

    /// Size of a staged chunk, or `None` if it is not on disk.
    pub fn chunk_len(&self, target: &ResolvedTarget, index: u32) -> io::Result<Option<u64>> {
        match std::fs::metadata(target.chunk_path(index)) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Indices in `0..total` with no chunk file on disk.
    pub fn absent_chunks(&self, target: &ResolvedTarget, total: u32) -> io::Result<Vec<u32>> {
        let mut absent = Vec::new();
        for index in 0..total {
            if self.chunk_len(target, index)?.is_none() {
                absent.push(index);
            }
        }
        Ok(absent)
    }

    fn write_chunk(&self, dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut retried = false;
        loop {
            let result = std::fs::create_dir_all(dir)
                .and_then(|()| write_atomic(path, bytes, self.sync_writes));
            match result {
                // A reclaim of a sibling target may prune a shared parent
                // while the directories are created or the file is written.
                Err(e) if e.kind() == io::ErrorKind::NotFound && !retried => retried = true,
                other => return other,
            }
        }
    }
}
