//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, bail};
use chunkstage_transfer::{
    ChunkAck, ChunkReader, IdentityResolver, UploadEngine, calculate_file_checksum,
};
use serde::Serialize;
use tokio::task::{JoinSet, spawn_blocking};
use tracing::{debug, info};

use crate::config::Config;

/// Prints every pending upload as one JSON line.
pub async fn status(engine: &UploadEngine) -> anyhow::Result<()> {
    let pending = engine.pending_uploads().await?;
    if pending.is_empty() {
        info!("no pending uploads");
    }
    for upload in &pending {
        println!("{}", serde_json::to_string(upload)?);
    }
    Ok(())
}

pub fn show_config(config: &Config) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

#[derive(Debug)]
pub struct IngestArgs {
    pub file: PathBuf,
    pub session: Option<String>,
    pub relative_path: String,
    pub chunk_size: usize,
    pub parallel: usize,
}

#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub session_key: String,
    pub relative_path: String,
    pub filename: String,
    pub chunks: u32,
    pub size: u64,
    pub sha256: String,
    pub final_path: PathBuf,
}

/// Feeds a local file through the engine, last chunk first, with up to
/// `parallel` chunks in flight, then checks the published artifact against
/// the source digest.
pub async fn ingest(engine: &UploadEngine, args: IngestArgs) -> anyhow::Result<()> {
    let report = ingest_file(engine, args).await?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

pub async fn ingest_file(engine: &UploadEngine, args: IngestArgs) -> anyhow::Result<IngestReport> {
    let filename = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", args.file.display()))?
        .to_string();
    let session_key = args.session.unwrap_or_else(|| engine.session_key());

    // Resolve up front so naming errors surface before any chunk is read.
    let config = engine.config();
    let target = IdentityResolver::new(&config.staging_root, &config.final_root).resolve(
        &session_key,
        &args.relative_path,
        &filename,
    )?;

    let source = args.file.clone();
    let chunk_size = args.chunk_size;
    let (reader, source_sha256) = spawn_blocking(move || -> anyhow::Result<_> {
        let reader = ChunkReader::new(&source, chunk_size)
            .with_context(|| format!("opening {}", source.display()))?;
        let digest = calculate_file_checksum(&source)?;
        Ok((reader, digest))
    })
    .await??;

    let total = reader.chunk_count();
    let size = reader.file_size();
    info!(
        file = %args.file.display(),
        upload = %target.target(),
        chunks = total,
        size,
        "ingesting"
    );

    let reader = Arc::new(Mutex::new(reader));
    let parallel = args.parallel.max(1);
    let mut tasks: JoinSet<anyhow::Result<ChunkAck>> = JoinSet::new();
    let mut completed = false;

    for index in (0..total).rev() {
        while tasks.len() >= parallel {
            completed |= next_ack(&mut tasks).await?;
        }

        let engine = engine.clone();
        let reader = Arc::clone(&reader);
        let session_key = session_key.clone();
        let relative_path = args.relative_path.clone();
        let filename = filename.clone();
        tasks.spawn(async move {
            let bytes = spawn_blocking(move || {
                reader
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .read_chunk(index)
            })
            .await??;
            let ack = engine
                .ingest_chunk(&session_key, &relative_path, &filename, index, total, bytes)
                .await?;
            debug!(index, received = ack.received_count, "chunk accepted");
            Ok(ack)
        });
    }
    while !tasks.is_empty() {
        completed |= next_ack(&mut tasks).await?;
    }

    if !completed {
        bail!("all {total} chunks sent but the upload did not complete");
    }

    let final_path = target.final_path().to_path_buf();
    let published = {
        let path = final_path.clone();
        spawn_blocking(move || calculate_file_checksum(&path)).await??
    };
    if published != source_sha256 {
        bail!("published artifact digest {published} differs from source {source_sha256}");
    }

    info!(upload = %target.target(), sha256 = %published, "ingest verified");
    Ok(IngestReport {
        session_key,
        relative_path: target.target().relative_path(),
        filename,
        chunks: total,
        size,
        sha256: published,
        final_path,
    })
}

/// Waits for one chunk task; returns whether it completed the upload.
async fn next_ack(tasks: &mut JoinSet<anyhow::Result<ChunkAck>>) -> anyhow::Result<bool> {
    match tasks.join_next().await {
        Some(joined) => Ok(joined??.completed),
        None => Ok(false),
    }
}
