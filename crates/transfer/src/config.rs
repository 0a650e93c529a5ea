use std::path::{Path, PathBuf};

use chunkstage_protocol::DEFAULT_MAX_CHUNK_BYTES;

use crate::UploadError;

/// Construction parameters of an [`UploadEngine`](crate::UploadEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Root of the staging tree (chunks and completion records).
    pub staging_root: PathBuf,
    /// Root of the published artifacts.
    pub final_root: PathBuf,
    /// Largest accepted chunk payload.
    pub max_chunk_bytes: u64,
    /// fsync files and directories on every atomic replace.
    pub sync_writes: bool,
}

impl EngineConfig {
    pub fn new(staging_root: impl Into<PathBuf>, final_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            final_root: final_root.into(),
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            sync_writes: true,
        }
    }

    pub fn with_max_chunk_bytes(mut self, limit: u64) -> Self {
        self.max_chunk_bytes = limit;
        self
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Checks that both roots are set and that neither contains the other.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.staging_root.as_os_str().is_empty() {
            return Err(UploadError::InvalidConfig("staging root is empty".into()));
        }
        if self.final_root.as_os_str().is_empty() {
            return Err(UploadError::InvalidConfig("final root is empty".into()));
        }
        if self.max_chunk_bytes == 0 {
            return Err(UploadError::InvalidConfig(
                "max chunk size must be positive".into(),
            ));
        }

        let staging = absolute(&self.staging_root)?;
        let final_root = absolute(&self.final_root)?;
        if staging.starts_with(&final_root) || final_root.starts_with(&staging) {
            return Err(UploadError::InvalidConfig(
                "staging and final roots must be distinct, non-nested directories".into(),
            ));
        }
        Ok(())
    }
}

/// Absolute, lexically normalized form of `path`; symlinks are not resolved
/// since the roots may not exist yet.
fn absolute(path: &Path) -> Result<PathBuf, UploadError> {
    let abs = std::path::absolute(path)?;
    let mut out = PathBuf::new();
    for component in abs.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::new("/srv/staging", "/srv/final");
        assert_eq!(config.max_chunk_bytes, DEFAULT_MAX_CHUNK_BYTES);
        assert!(config.sync_writes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builders() {
        let config = EngineConfig::new("a", "b")
            .with_max_chunk_bytes(1024)
            .with_sync_writes(false);
        assert_eq!(config.max_chunk_bytes, 1024);
        assert!(!config.sync_writes);
    }

    #[test]
    fn rejects_empty_roots() {
        assert!(matches!(
            EngineConfig::new("", "/srv/final").validate(),
            Err(UploadError::InvalidConfig(_))
        ));
        assert!(matches!(
            EngineConfig::new("/srv/staging", "").validate(),
            Err(UploadError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_same_or_nested_roots() {
        for (staging, final_root) in [
            ("/srv/up", "/srv/up"),
            ("/srv/up", "/srv/up/final"),
            ("/srv/up/staging", "/srv/up"),
            ("/srv/up/./x/..", "/srv/up"),
        ] {
            assert!(
                EngineConfig::new(staging, final_root).validate().is_err(),
                "{staging} / {final_root}"
            );
        }
    }

    #[test]
    fn siblings_with_common_prefix_are_fine() {
        // `/srv/up` is a string prefix of `/srv/upload` but not a parent.
        assert!(EngineConfig::new("/srv/up", "/srv/upload").validate().is_ok());
    }

    #[test]
    fn rejects_zero_chunk_limit() {
        let config = EngineConfig::new("/a", "/b").with_max_chunk_bytes(0);
        assert!(config.validate().is_err());
    }
}
