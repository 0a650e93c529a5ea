//! Wire vocabulary shared between the upload engine and whatever transport
//! delivers chunks to it.
//!
//! The field names follow the multipart form the browser uploader posts
//! (`filename`, `relativePath`, `chunkIndex`, `totalChunks`, `newFolderName`).

pub mod constants;
pub mod messages;

pub use constants::{CHUNK_FIELD, DEFAULT_MAX_CHUNK_BYTES};
pub use messages::{ChunkFields, ChunkReceived, ErrorResponse, ProtocolError, UploadChunkForm};
