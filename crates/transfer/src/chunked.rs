use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::DEFAULT_CHUNK_SIZE;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    hash_reader(&mut hasher, &mut file)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Feeds everything `reader` yields into `hasher`. Returns the byte count.
pub(crate) fn hash_reader(hasher: &mut Sha256, reader: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok(total)
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Random-access reader that splits a local file into fixed-size chunks.
///
/// Chunks can be read in any order, which is how uploaders that send chunks
/// in parallel consume a file.
pub struct ChunkReader {
    file: std::fs::File,
    chunk_size: usize,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (4 MiB) is used.
    pub fn new(path: &Path, chunk_size: usize) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };

        let reader = Self {
            file,
            chunk_size,
            file_size,
        };
        if u32::try_from(reader.raw_chunk_count()).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "file needs more than u32::MAX chunks; use a larger chunk size",
            ));
        }
        Ok(reader)
    }

    /// Number of chunks the file splits into. An empty file is one empty chunk.
    pub fn chunk_count(&self) -> u32 {
        self.raw_chunk_count() as u32
    }

    fn raw_chunk_count(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size as u64).max(1)
    }

    /// Reads chunk `index`.
    pub fn read_chunk(&mut self, index: u32) -> io::Result<Vec<u8>> {
        if index >= self.chunk_count() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("chunk {index} beyond {} chunks", self.chunk_count()),
            ));
        }

        let offset = u64::from(index) * self.chunk_size as u64;
        let len = (self.file_size - offset).min(self.chunk_size as u64) as usize;

        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}
