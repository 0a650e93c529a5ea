//! Chunk staging, completion tracking and in-order assembly.
//!
//! A file arrives as independently transmitted chunks. Each chunk is staged
//! durably under the staging root, its receipt is recorded in a per-target
//! completion record, and once every index is present the chunks are merged
//! into the final artifact under the final root. The staging area is then
//! reclaimed.
//!
//! All state changes for one target run under a per-target lock (see
//! [`TargetLocks`]); unrelated targets never contend.
//!
//! # Staging layout
//!
//! ```text
//! <staging_root>/<session>/<relative_path>/<filename>.part<index>
//! <staging_root>/<session>/<relative_path>/<filename>.chunks.meta
//! <final_root>/<session>/<relative_path>/<filename>
//! ```
//!
//! The completion record is per target, named after the file it tracks,
//! not a single `chunks.meta` per directory. Files uploaded into the same
//! directory each have their own record. Tooling that inspects staging
//! should match the [`RECORD_SUFFIX`] suffix, or use
//! [`UploadEngine::pending_uploads`].

mod assembler;
mod chunked;
mod clock;
mod config;
mod engine;
mod identity;
mod locks;
mod reclaim;
mod store;
mod tracker;

pub use assembler::{Assembler, FinalArtifact};
pub use chunked::{ChunkReader, calculate_file_checksum, checksum_bytes};
pub use clock::{DailyBucket, FixedSession, SessionClock};
pub use config::EngineConfig;
pub use engine::{ChunkAck, ChunkUpload, PendingUpload, UploadEngine, UploadStatus};
pub use identity::{IdentityResolver, MAX_FILENAME_LEN, ResolvedTarget, UploadTarget};
pub use locks::{TargetGuard, TargetLocks};
pub use reclaim::{ReclaimReport, Reclaimer};
pub use store::{ChunkStore, StagedChunk};
pub use tracker::{CompletionRecord, CompletionTracker, Progress};

use chunkstage_protocol::{ErrorResponse, ProtocolError};

/// Default chunk size used when splitting local files: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Suffix of the completion record written next to a target's chunks.
pub const RECORD_SUFFIX: &str = ".chunks.meta";

/// Infix between a filename and its chunk index (`report.csv.part3`).
pub const PART_INFIX: &str = ".part";

/// Errors produced by the upload engine.
///
/// Messages identify targets as `session/relative/path/filename` and never
/// embed absolute filesystem paths.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("chunk index {index} out of range for {total} chunks")]
    ChunkIndexOutOfRange { index: u32, total: u32 },

    #[error("total chunk count mismatch: declared {declared}, got {requested}")]
    TotalCountMismatch { declared: u32, requested: u32 },

    #[error("chunk of {size} bytes exceeds the {limit} byte limit")]
    ChunkTooLarge { size: u64, limit: u64 },

    #[error("failed to write chunk: {0}")]
    ChunkWriteFailed(#[source] std::io::Error),

    #[error("missing chunk {0}")]
    MissingChunk(u32),

    #[error("assembled size mismatch: expected {expected} bytes, got {actual}")]
    AssemblyIntegrityError { expected: u64, actual: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("worker failed: {0}")]
    Worker(String),
}

impl UploadError {
    /// HTTP-style status code a transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidIdentity(_) | Self::Protocol(_) | Self::ChunkIndexOutOfRange { .. } => 400,
            Self::TotalCountMismatch { .. } => 409,
            Self::ChunkTooLarge { .. } => 413,
            _ => 500,
        }
    }

    /// Whether resubmitting the same chunk may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ChunkWriteFailed(_) | Self::MissingChunk(_) | Self::Io(_) | Self::Worker(_)
        )
    }

    /// Transport failure body carrying this error's message.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.to_string())
    }
}

/// Checks `index` against `total` and against a previously declared total.
pub(crate) fn check_chunk(index: u32, total: u32, declared: Option<u32>) -> Result<(), UploadError> {
    if let Some(declared) = declared {
        if declared != total {
            return Err(UploadError::TotalCountMismatch {
                declared,
                requested: total,
            });
        }
    }
    if index >= total {
        return Err(UploadError::ChunkIndexOutOfRange { index, total });
    }
    Ok(())
}
