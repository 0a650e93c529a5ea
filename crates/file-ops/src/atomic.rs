//! All-or-nothing file replacement.
//!
//! Data is written to a hidden sibling `.<name>.<uuid>.tmp`, flushed and then
//! renamed over the destination. Readers of the destination only ever see
//! the previous content or the complete new content.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

const TEMP_SUFFIX: &str = ".tmp";

/// Hyphenated UUID length plus its leading `.` separator.
const UUID_TAIL_LEN: usize = 37;

/// Bytes a temporary name adds to the name it replaces: the leading `.`,
/// the `.<uuid>` tail and the `.tmp` suffix.
pub const TEMP_NAME_OVERHEAD: usize = 1 + UUID_TAIL_LEN + TEMP_SUFFIX.len();

/// Returns a fresh temporary sibling path for `path`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}{TEMP_SUFFIX}", Uuid::new_v4()))
}

/// If `file_name` was produced by [`temp_path_for`], returns the name of the
/// file it was meant to replace.
pub fn temp_owner(file_name: &str) -> Option<&str> {
    let rest = file_name.strip_prefix('.')?.strip_suffix(TEMP_SUFFIX)?;
    let split = rest.len().checked_sub(UUID_TAIL_LEN)?;
    if !rest.is_char_boundary(split) {
        return None;
    }
    let (owner, tail) = rest.split_at(split);
    let id = tail.strip_prefix('.')?;
    Uuid::parse_str(id).ok()?;
    (!owner.is_empty()).then_some(owner)
}

/// A file that becomes visible at its final path only on [`commit`].
///
/// Dropping an uncommitted `AtomicFile` removes the temporary.
///
/// [`commit`]: AtomicFile::commit
pub struct AtomicFile {
    file: Option<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl AtomicFile {
    /// Creates the temporary sibling of `final_path`.
    ///
    /// The parent directory must already exist.
    pub fn create(final_path: &Path) -> io::Result<Self> {
        let temp_path = temp_path_for(final_path);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        Ok(Self {
            file: Some(file),
            temp_path,
            final_path: final_path.to_path_buf(),
            committed: false,
        })
    }

    /// Path of the temporary file.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Path the file is published at on commit.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Flushes the data (and `fsync`s when `sync` is set), then renames the
    /// temporary over the final path.
    pub fn commit(mut self, sync: bool) -> io::Result<PathBuf> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            if sync {
                file.sync_all()?;
            }
        }

        fs::rename(&self.temp_path, &self.final_path)?;
        self.committed = true;

        if sync {
            sync_parent(&self.final_path);
        }
        Ok(self.final_path.clone())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(f) => f.write(buf),
            None => Err(io::Error::other("atomic file already committed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            if let Err(e) = fs::remove_file(&self.temp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(
                        file = %self.temp_path.display(),
                        error = %e,
                        "failed to remove abandoned temporary file"
                    );
                }
            }
        }
    }
}

/// Atomically replaces `path` with `data`.
pub fn write_atomic(path: &Path, data: &[u8], sync: bool) -> io::Result<()> {
    let mut file = AtomicFile::create(path)?;
    file.write_all(data)?;
    file.commit(sync)?;
    Ok(())
}

/// Persists the directory entry created by a rename.
fn sync_parent(path: &Path) {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
                tracing::debug!(dir = %parent.display(), error = %e, "directory sync failed");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}
