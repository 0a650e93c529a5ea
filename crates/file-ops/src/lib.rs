//! Filesystem primitives used by the upload engine.
//!
//! Provides all-or-nothing file replacement (write to a sibling temporary
//! name, flush, rename) and deletion helpers that refuse to touch anything
//! outside a given root.

mod atomic;
mod delete;

pub use atomic::{AtomicFile, TEMP_NAME_OVERHEAD, temp_owner, temp_path_for, write_atomic};
pub use delete::{ensure_within, prune_empty_dirs, remove_file_if_exists};

/// Errors produced by file operations.
#[derive(Debug, thiserror::Error)]
pub enum FileOpsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("refusing to operate outside root: {0}")]
    OutsideRoot(String),
}
