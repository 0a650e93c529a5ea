//! Root-confined deletion.

use std::io;
use std::path::{Path, PathBuf};

use crate::FileOpsError;

/// Resolves `path` and checks that it lies strictly below `root`.
///
/// Both paths are canonicalized, so symlinks pointing out of `root` are
/// caught. Returns the canonical path.
pub fn ensure_within(root: &Path, path: &Path) -> Result<PathBuf, FileOpsError> {
    let abs = std::fs::canonicalize(path)?;
    let root_canon = std::fs::canonicalize(root)?;

    if !abs.starts_with(&root_canon) {
        return Err(FileOpsError::OutsideRoot(format!(
            "{} is not below {}",
            abs.display(),
            root_canon.display()
        )));
    }

    // The root itself is never a valid target.
    if abs.strip_prefix(&root_canon).map_or(true, |rel| rel.as_os_str().is_empty()) {
        return Err(FileOpsError::OutsideRoot(format!(
            "refusing to operate on root itself: {}",
            abs.display()
        )));
    }

    Ok(abs)
}

/// Removes a file. Returns `false` when it was already gone.
pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Removes `start` and then each parent, stopping at the first directory
/// that is not empty or at `stop` (which is never removed).
///
/// Directories that vanished concurrently are skipped. Returns the number of
/// directories removed.
pub fn prune_empty_dirs(start: &Path, stop: &Path) -> usize {
    let mut removed = 0;
    let mut current = Some(start);

    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) {
            break;
        }

        match std::fs::remove_dir(dir) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::trace!(dir = %dir.display(), error = %e, "stopped pruning");
                break;
            }
        }
        current = dir.parent();
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_within_accepts_nested_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("session").join("dir");
        std::fs::create_dir_all(&nested).unwrap();

        let abs = ensure_within(tmp.path(), &nested).unwrap();
        assert!(abs.ends_with("session/dir"));
    }

    #[test]
    fn ensure_within_refuses_root() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ensure_within(tmp.path(), tmp.path()).unwrap_err();
        assert!(matches!(err, FileOpsError::OutsideRoot(_)));
    }

    #[test]
    fn ensure_within_refuses_outside() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let err = ensure_within(root.path(), outside.path()).unwrap_err();
        assert!(matches!(err, FileOpsError::OutsideRoot(_)));
    }

    #[cfg(unix)]
    #[test]
    fn ensure_within_refuses_symlink_escape() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let link = root.path().join("escape");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        let err = ensure_within(root.path(), &link).unwrap_err();
        assert!(matches!(err, FileOpsError::OutsideRoot(_)));
    }

    #[test]
    fn ensure_within_missing_path_is_io_error() {
        let root = tempfile::tempdir().unwrap();
        let err = ensure_within(root.path(), &root.path().join("nope")).unwrap_err();
        assert!(matches!(err, FileOpsError::Io(_)));
    }

    #[test]
    fn remove_file_if_exists_reports_absence() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f");
        std::fs::write(&file, "x").unwrap();

        assert!(remove_file_if_exists(&file).unwrap());
        assert!(!remove_file_if_exists(&file).unwrap());
    }

    #[test]
    fn prune_stops_at_non_empty_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let leaf = root.join("s").join("a").join("b");
        std::fs::create_dir_all(&leaf).unwrap();
        std::fs::write(root.join("s").join("keep.txt"), "x").unwrap();

        let removed = prune_empty_dirs(&leaf, root);
        assert_eq!(removed, 2);
        assert!(!root.join("s").join("a").exists());
        assert!(root.join("s").exists());
    }

    #[test]
    fn prune_never_removes_stop() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let leaf = root.join("s");
        std::fs::create_dir_all(&leaf).unwrap();

        assert_eq!(prune_empty_dirs(&leaf, &root), 1);
        assert!(root.exists());
        assert_eq!(prune_empty_dirs(&root, &root), 0);
        assert!(root.exists());
    }

    #[test]
    fn prune_skips_vanished_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("s")).unwrap();

        // `s/gone` never existed; pruning continues with `s`.
        assert_eq!(prune_empty_dirs(&root.join("s").join("gone"), root), 1);
        assert!(!root.join("s").exists());
    }
}
