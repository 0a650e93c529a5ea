use std::path::{Path, PathBuf};
use std::sync::Arc;

use chunkstage_protocol::{ChunkReceived, UploadChunkForm};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::assembler::Assembler;
use crate::clock::{DailyBucket, SessionClock};
use crate::config::EngineConfig;
use crate::identity::{IdentityResolver, join_relative};
use crate::locks::{TargetGuard, TargetLocks};
use crate::reclaim::Reclaimer;
use crate::store::ChunkStore;
use crate::tracker::{CompletionTracker, RecordError, read_record};
use crate::{RECORD_SUFFIX, UploadError, check_chunk};

/// Outcome of one accepted chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkAck {
    pub received_count: u32,
    pub total_count: u32,
    /// `true` once the artifact has been assembled and published.
    pub completed: bool,
}

impl ChunkAck {
    /// Transport body acknowledging chunk `index`.
    pub fn to_response(&self, index: u32) -> ChunkReceived {
        ChunkReceived::new(index, self.received_count, self.total_count, self.completed)
    }
}

/// One chunk with its full identity.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub session_key: String,
    pub relative_path: String,
    pub filename: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub bytes: Vec<u8>,
}

impl ChunkUpload {
    /// Builds an upload from transport form fields. A missing folder name
    /// falls back to the clock's session key.
    pub fn from_form(
        form: &UploadChunkForm,
        bytes: Vec<u8>,
        clock: &dyn SessionClock,
    ) -> Result<Self, UploadError> {
        let fields = form.parse()?;
        Ok(Self {
            session_key: fields
                .new_folder_name
                .unwrap_or_else(|| clock.session_key()),
            relative_path: fields.relative_path,
            filename: fields.filename,
            chunk_index: fields.chunk_index,
            total_chunks: fields.total_chunks,
            bytes,
        })
    }
}

/// Progress of one target as persisted on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadStatus {
    /// Declared chunk count, `None` when no chunk has been recorded.
    pub total_chunks: Option<u32>,
    pub received: Vec<u32>,
    pub missing: Vec<u32>,
    pub artifact_present: bool,
}

/// An upload with staged state that has not been assembled yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingUpload {
    pub session_key: String,
    pub relative_path: String,
    pub filename: String,
    pub received_count: u32,
    pub total_chunks: u32,
}

struct EngineInner {
    config: EngineConfig,
    resolver: IdentityResolver,
    locks: TargetLocks,
    store: ChunkStore,
    tracker: CompletionTracker,
    assembler: Assembler,
    reclaimer: Reclaimer,
    clock: Box<dyn SessionClock>,
}

/// Accepts chunks of many concurrent uploads and publishes each file once
/// all of its chunks are staged.
///
/// Cheap to clone; clones share locks and configuration.
#[derive(Clone)]
pub struct UploadEngine {
    inner: Arc<EngineInner>,
}

impl UploadEngine {
    /// Creates an engine with one session per day at UTC+05:30.
    pub fn new(config: EngineConfig) -> Result<Self, UploadError> {
        Self::with_clock(config, DailyBucket::default())
    }

    /// Validates `config`, creates both roots and builds the engine.
    pub fn with_clock(
        config: EngineConfig,
        clock: impl SessionClock + 'static,
    ) -> Result<Self, UploadError> {
        config.validate()?;
        std::fs::create_dir_all(&config.staging_root)?;
        std::fs::create_dir_all(&config.final_root)?;

        info!(
            staging_root = %config.staging_root.display(),
            final_root = %config.final_root.display(),
            max_chunk_bytes = config.max_chunk_bytes,
            sync_writes = config.sync_writes,
            "upload engine ready"
        );

        let inner = EngineInner {
            resolver: IdentityResolver::new(&config.staging_root, &config.final_root),
            locks: TargetLocks::new(),
            store: ChunkStore::new(config.sync_writes),
            tracker: CompletionTracker::new(config.sync_writes),
            assembler: Assembler::new(config.sync_writes),
            reclaimer: Reclaimer::new(&config.staging_root),
            clock: Box::new(clock),
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Session key a form without a folder name would be filed under now.
    pub fn session_key(&self) -> String {
        self.inner.clock.session_key()
    }

    /// Stages chunk `index` of `total` and, if it was the last one missing,
    /// assembles the file and reclaims its staging area.
    ///
    /// Identity and range are checked before any lock is taken or anything
    /// touches the disk. The lock guard moves into the blocking worker, so
    /// the critical section runs to completion even if this future is
    /// dropped.
    pub async fn ingest_chunk(
        &self,
        session_key: &str,
        relative_path: &str,
        filename: &str,
        index: u32,
        total: u32,
        bytes: Vec<u8>,
    ) -> Result<ChunkAck, UploadError> {
        let size = bytes.len() as u64;
        let limit = self.inner.config.max_chunk_bytes;
        if size > limit {
            return Err(UploadError::ChunkTooLarge { size, limit });
        }

        let target = self
            .inner
            .resolver
            .resolve(session_key, relative_path, filename)?;
        check_chunk(index, total, None)?;

        let guard = self.inner.locks.lock(target).await;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.commit_chunk(&guard, index, total, &bytes))
            .await
            .map_err(|e| UploadError::Worker(e.to_string()))?
    }

    pub async fn ingest(&self, upload: ChunkUpload) -> Result<ChunkAck, UploadError> {
        self.ingest_chunk(
            &upload.session_key,
            &upload.relative_path,
            &upload.filename,
            upload.chunk_index,
            upload.total_chunks,
            upload.bytes,
        )
        .await
    }

    /// Parses transport form fields and ingests the chunk they describe.
    pub async fn ingest_form(
        &self,
        form: &UploadChunkForm,
        bytes: Vec<u8>,
    ) -> Result<ChunkAck, UploadError> {
        let upload = ChunkUpload::from_form(form, bytes, self.inner.clock.as_ref())?;
        self.ingest(upload).await
    }

    /// Reports which chunks of a target are on record, so a client can
    /// resend only what is missing.
    pub async fn status(
        &self,
        session_key: &str,
        relative_path: &str,
        filename: &str,
    ) -> Result<UploadStatus, UploadError> {
        let target = self
            .inner
            .resolver
            .resolve(session_key, relative_path, filename)?;
        let guard = self.inner.locks.lock(target).await;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.status(&guard))
            .await
            .map_err(|e| UploadError::Worker(e.to_string()))?
    }

    /// Lists every target with a completion record under the staging root,
    /// sorted by session, directory and filename. Corrupt records are
    /// skipped.
    pub async fn pending_uploads(&self) -> Result<Vec<PendingUpload>, UploadError> {
        let root = self.inner.config.staging_root.clone();
        tokio::task::spawn_blocking(move || scan_pending(&root))
            .await
            .map_err(|e| UploadError::Worker(e.to_string()))?
    }
}

impl EngineInner {
    fn commit_chunk(
        &self,
        guard: &TargetGuard,
        index: u32,
        total: u32,
        bytes: &[u8],
    ) -> Result<ChunkAck, UploadError> {
        let target = guard.target();
        let declared = self.tracker.declared_total(guard);
        self.store.stage(guard, index, total, declared, bytes)?;
        let progress = self.tracker.record_received(guard, index, total)?;

        debug!(
            upload = %target.target(),
            index,
            received = progress.received_count,
            total,
            "chunk recorded"
        );

        if !progress.all_received {
            return Ok(ChunkAck {
                received_count: progress.received_count,
                total_count: total,
                completed: false,
            });
        }

        info!(upload = %target.target(), total, "all chunks received, assembling");
        match self.assembler.assemble(guard, total) {
            Ok(_) => {}
            Err(UploadError::MissingChunk(first)) => {
                let absent = match self.store.absent_chunks(target, total) {
                    Ok(absent) if !absent.is_empty() => absent,
                    Ok(_) => vec![first],
                    Err(e) => {
                        warn!(
                            upload = %target.target(),
                            error = %e,
                            "failed to list staged chunks"
                        );
                        vec![first]
                    }
                };
                error!(
                    upload = %target.target(),
                    missing = ?absent,
                    "chunks on record but missing from staging"
                );
                if let Err(e) = self.tracker.forget(guard, &absent) {
                    warn!(upload = %target.target(), error = %e, "failed to forget missing chunks");
                }
                return Err(UploadError::MissingChunk(first));
            }
            Err(e) => {
                error!(
                    upload = %target.target(),
                    error = %e,
                    "assembly failed, staging kept"
                );
                return Err(e);
            }
        }

        if let Err(e) = self.reclaimer.reclaim(guard) {
            warn!(
                upload = %target.target(),
                error = %e,
                "artifact published but staging not reclaimed"
            );
        }

        Ok(ChunkAck {
            received_count: progress.received_count,
            total_count: total,
            completed: true,
        })
    }

    fn status(&self, guard: &TargetGuard) -> Result<UploadStatus, UploadError> {
        let target = guard.target();
        let artifact_present = match std::fs::metadata(target.final_path()) {
            Ok(meta) => meta.is_file(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        Ok(match self.tracker.load(guard) {
            Some(record) => UploadStatus {
                total_chunks: Some(record.total_chunks),
                missing: record.missing(),
                received: record.received_chunks.into_iter().collect(),
                artifact_present,
            },
            None => UploadStatus {
                total_chunks: None,
                received: Vec::new(),
                missing: Vec::new(),
                artifact_present,
            },
        })
    }
}

fn scan_pending(root: &Path) -> Result<Vec<PendingUpload>, UploadError> {
    let mut pending = Vec::new();
    let mut stack: Vec<(PathBuf, Vec<String>)> = vec![(root.to_path_buf(), Vec::new())];

    while let Some((dir, components)) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            // Reclaimed while scanning.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                let mut next = components.clone();
                next.push(name);
                stack.push((entry.path(), next));
                continue;
            }

            let Some(filename) = name.strip_suffix(RECORD_SUFFIX) else {
                continue;
            };
            let Some((session_key, rel)) = components.split_first() else {
                continue;
            };
            if filename.is_empty() {
                continue;
            }

            match read_record(&entry.path()) {
                Ok(Some(record)) => pending.push(PendingUpload {
                    session_key: session_key.clone(),
                    relative_path: join_relative(rel),
                    filename: filename.to_string(),
                    received_count: record.received_count(),
                    total_chunks: record.total_chunks,
                }),
                Ok(None) => {}
                Err(RecordError::Corrupt(reason)) => {
                    warn!(record = %name, reason = %reason, "skipping corrupt completion record");
                }
                Err(RecordError::Io(e)) => {
                    warn!(record = %name, error = %e, "skipping unreadable completion record");
                }
            }
        }
    }

    pending.sort_by(|a, b| {
        (&a.session_key, &a.relative_path, &a.filename).cmp(&(
            &b.session_key,
            &b.relative_path,
            &b.filename,
        ))
    });
    Ok(pending)
}
