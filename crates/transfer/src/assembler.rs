use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use chunkstage_file_ops::AtomicFile;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::UploadError;
use crate::chunked::{calculate_file_checksum, hash_reader};
use crate::identity::ResolvedTarget;
use crate::locks::TargetGuard;

/// Copy buffer for merging chunks: 1 MiB.
const MERGE_BUFFER_SIZE: usize = 1024 * 1024;

/// A published, verified artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalArtifact {
    pub path: PathBuf,
    pub size: u64,
    /// SHA-256 of the artifact, hex encoded.
    pub sha256: String,
    /// `true` when an identical artifact was already in place.
    pub reused: bool,
}

/// Merges staged chunks into the final artifact.
#[derive(Debug, Clone)]
pub struct Assembler {
    sync_writes: bool,
}

impl Assembler {
    pub fn new(sync_writes: bool) -> Self {
        Self { sync_writes }
    }

    /// Concatenates chunks `0..total` of the guarded target, in index order,
    /// into its final path.
    ///
    /// The merge goes through a temporary sibling that is renamed into place,
    /// so the final path only ever shows a complete artifact. Running again
    /// for an already assembled target is a no-op.
    pub fn assemble(&self, guard: &TargetGuard, total: u32) -> Result<FinalArtifact, UploadError> {
        let target = guard.target();
        let lengths = chunk_lengths(target, total)?;
        let expected: u64 = lengths.iter().sum();

        if let Some(existing) = existing_artifact(target, total, expected)? {
            info!(
                upload = %target.target(),
                size = existing.size,
                "artifact already assembled"
            );
            return Ok(existing);
        }

        let final_path = target.final_path();
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out = AtomicFile::create(final_path)?;
        let mut hasher = Sha256::new();
        let mut written = 0u64;
        let mut buf = vec![0u8; MERGE_BUFFER_SIZE];

        for index in 0..total {
            let mut part = open_chunk(target, index)?;
            loop {
                let n = part.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                out.write_all(&buf[..n])?;
                written += n as u64;
            }
        }

        // A chunk changed size while merging; do not publish.
        if written != expected {
            error!(
                upload = %target.target(),
                expected,
                written,
                "merged size differs from staged chunks"
            );
            return Err(UploadError::AssemblyIntegrityError {
                expected,
                actual: written,
            });
        }

        out.commit(self.sync_writes)?;

        let actual = std::fs::metadata(final_path)?.len();
        if actual != expected {
            error!(
                upload = %target.target(),
                expected,
                actual,
                "published artifact size mismatch"
            );
            return Err(UploadError::AssemblyIntegrityError { expected, actual });
        }

        let sha256 = hex::encode(hasher.finalize());
        info!(
            upload = %target.target(),
            chunks = total,
            size = actual,
            sha256 = %sha256,
            "artifact assembled"
        );

        Ok(FinalArtifact {
            path: final_path.to_path_buf(),
            size: actual,
            sha256,
            reused: false,
        })
    }
}

/// Sizes of chunks `0..total`; the first absent index is `MissingChunk`.
fn chunk_lengths(target: &ResolvedTarget, total: u32) -> Result<Vec<u64>, UploadError> {
    (0..total)
        .map(|index| match std::fs::metadata(target.chunk_path(index)) {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(UploadError::MissingChunk(index)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(UploadError::MissingChunk(index)),
            Err(e) => Err(UploadError::Io(e)),
        })
        .collect()
}

fn open_chunk(target: &ResolvedTarget, index: u32) -> Result<File, UploadError> {
    File::open(target.chunk_path(index)).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            UploadError::MissingChunk(index)
        } else {
            UploadError::Io(e)
        }
    })
}

/// Returns the artifact already at the final path if it has exactly the
/// content the chunks would produce.
fn existing_artifact(
    target: &ResolvedTarget,
    total: u32,
    expected: u64,
) -> Result<Option<FinalArtifact>, UploadError> {
    let final_path = target.final_path();
    match std::fs::metadata(final_path) {
        Ok(meta) if meta.is_file() && meta.len() == expected => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(UploadError::Io(e)),
    }

    let mut hasher = Sha256::new();
    for index in 0..total {
        hash_reader(&mut hasher, &mut open_chunk(target, index)?)?;
    }
    let staged = hex::encode(hasher.finalize());
    let published = calculate_file_checksum(final_path)?;

    if staged != published {
        return Ok(None);
    }
    Ok(Some(FinalArtifact {
        path: final_path.to_path_buf(),
        size: expected,
        sha256: published,
        reused: true,
    }))
}
