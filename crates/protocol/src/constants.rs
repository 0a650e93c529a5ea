/// Multipart field carrying the chunk bytes.
pub const CHUNK_FIELD: &str = "chunk";

/// Largest chunk accepted in a single request (10 GiB).
///
/// Same as the request size limit of the browser uploader endpoint.
pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Form field names, in the order the uploader sends them.
pub mod fields {
    pub const FILENAME: &str = "filename";
    pub const RELATIVE_PATH: &str = "relativePath";
    pub const CHUNK_INDEX: &str = "chunkIndex";
    pub const TOTAL_CHUNKS: &str = "totalChunks";
    pub const NEW_FOLDER_NAME: &str = "newFolderName";
}
