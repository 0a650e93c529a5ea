use std::fmt;
use std::path::{Path, PathBuf};

use chunkstage_file_ops::{TEMP_NAME_OVERHEAD, temp_owner};

use crate::{PART_INFIX, RECORD_SUFFIX, UploadError};

/// Longest single path component accepted (typical `NAME_MAX`).
const MAX_COMPONENT_LEN: usize = 255;

/// Digits of the largest `u32` chunk index.
const MAX_INDEX_DIGITS: usize = 10;

/// Longest filename accepted.
///
/// Every name the engine derives from a filename must itself fit in a path
/// component. The longest one is a chunk temporary,
/// `.<filename>.part<index>.<uuid>.tmp`.
pub const MAX_FILENAME_LEN: usize = MAX_COMPONENT_LEN - derived_name_overhead();

const fn derived_name_overhead() -> usize {
    let part = PART_INFIX.len() + MAX_INDEX_DIGITS;
    let record = RECORD_SUFFIX.len();
    let longest = if part > record { part } else { record };
    longest + TEMP_NAME_OVERHEAD
}

/// Validated identity of one file being uploaded in chunks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadTarget {
    session_key: String,
    relative_path: Vec<String>,
    filename: String,
}

impl UploadTarget {
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Normalized relative directory, `/`-separated, `.` for the session
    /// root. Resolving it again yields the same target.
    pub fn relative_path(&self) -> String {
        join_relative(&self.relative_path)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// `<session>/<relative_path>` below a root.
    fn dir_under(&self, root: &Path) -> PathBuf {
        let mut dir = root.join(&self.session_key);
        dir.extend(&self.relative_path);
        dir
    }
}

impl fmt::Display for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/", self.session_key)?;
        for segment in &self.relative_path {
            write!(f, "{segment}/")?;
        }
        f.write_str(&self.filename)
    }
}

/// An [`UploadTarget`] bound to concrete staging and final locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    target: UploadTarget,
    staging_dir: PathBuf,
    final_path: PathBuf,
}

impl ResolvedTarget {
    pub fn target(&self) -> &UploadTarget {
        &self.target
    }

    /// `<staging_root>/<session>/<relative_path>`.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// `<final_root>/<session>/<relative_path>/<filename>`.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// `<staging_dir>/<filename>.part<index>`.
    pub fn chunk_path(&self, index: u32) -> PathBuf {
        self.staging_dir
            .join(format!("{}{PART_INFIX}{index}", self.target.filename))
    }

    /// `<staging_dir>/<filename>.chunks.meta`.
    pub fn record_path(&self) -> PathBuf {
        self.staging_dir.join(self.record_name())
    }

    pub(crate) fn record_name(&self) -> String {
        format!("{}{RECORD_SUFFIX}", self.target.filename)
    }

    /// Returns the chunk index if `name` is one of this target's chunk files.
    pub fn part_index(&self, name: &str) -> Option<u32> {
        let digits = name
            .strip_prefix(self.target.filename.as_str())?
            .strip_prefix(PART_INFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Whether a file named `name` in the staging directory belongs to this
    /// target: its record, one of its chunks, or a temporary of either.
    pub fn owns_staging_file(&self, name: &str) -> bool {
        let owned = |n: &str| n == self.record_name() || self.part_index(n).is_some();
        owned(name) || temp_owner(name).is_some_and(owned)
    }
}

/// Joins normalized segments with `/`, giving `.` for none.
pub(crate) fn join_relative(segments: &[String]) -> String {
    if segments.is_empty() {
        return ".".to_string();
    }
    segments.join("/")
}

/// Derives safe staging and final locations from caller-supplied names.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    staging_root: PathBuf,
    final_root: PathBuf,
}

impl IdentityResolver {
    pub fn new(staging_root: impl Into<PathBuf>, final_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            final_root: final_root.into(),
        }
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn final_root(&self) -> &Path {
        &self.final_root
    }

    /// Validates the raw names and resolves the target's locations.
    ///
    /// Rejects:
    /// - Empty components
    /// - Null bytes
    /// - Absolute relative paths, drive (`C:`) and UNC (`\\server`) prefixes
    /// - Parent directory traversal (`..`)
    /// - Separators inside the session key or filename
    /// - Filenames longer than [`MAX_FILENAME_LEN`]
    pub fn resolve(
        &self,
        session_key: &str,
        relative_path: &str,
        filename: &str,
    ) -> Result<ResolvedTarget, UploadError> {
        validate_name(session_key, "session key")?;
        validate_name(filename, "filename")?;
        if filename.len() > MAX_FILENAME_LEN {
            return Err(UploadError::InvalidIdentity(format!(
                "filename longer than {MAX_FILENAME_LEN} bytes"
            )));
        }
        let relative_path = normalize_relative_path(relative_path)?;

        let target = UploadTarget {
            session_key: session_key.to_string(),
            relative_path,
            filename: filename.to_string(),
        };

        let staging_dir = target.dir_under(&self.staging_root);
        let final_path = target.dir_under(&self.final_root).join(&target.filename);

        if !staging_dir.starts_with(&self.staging_root) || !final_path.starts_with(&self.final_root)
        {
            return Err(UploadError::InvalidIdentity(format!(
                "{target} resolves outside the configured roots"
            )));
        }

        Ok(ResolvedTarget {
            target,
            staging_dir,
            final_path,
        })
    }
}

/// Validates a single path component (session key or filename).
fn validate_name(value: &str, what: &str) -> Result<(), UploadError> {
    if value.is_empty() {
        return Err(UploadError::InvalidIdentity(format!("{what} is empty")));
    }
    if value.contains(['/', '\\']) {
        return Err(UploadError::InvalidIdentity(format!(
            "{what} must not contain path separators: {value}"
        )));
    }
    validate_segment(value, what)
}

fn validate_segment(segment: &str, what: &str) -> Result<(), UploadError> {
    if segment.contains('\0') {
        return Err(UploadError::InvalidIdentity(format!(
            "{what} contains a null byte"
        )));
    }
    if segment == "." || segment == ".." {
        return Err(UploadError::InvalidIdentity(format!(
            "{what} must not be '{segment}'"
        )));
    }
    if segment.len() > MAX_COMPONENT_LEN {
        return Err(UploadError::InvalidIdentity(format!(
            "{what} component longer than {MAX_COMPONENT_LEN} bytes"
        )));
    }
    Ok(())
}

/// Splits a relative directory path into validated segments.
///
/// Both `/` and `\` separate segments; empty and `.` segments are dropped.
fn normalize_relative_path(raw: &str) -> Result<Vec<String>, UploadError> {
    if raw.is_empty() {
        return Err(UploadError::InvalidIdentity("relative path is empty".into()));
    }
    if raw.contains('\0') {
        return Err(UploadError::InvalidIdentity(
            "relative path contains a null byte".into(),
        ));
    }
    if raw.starts_with(['/', '\\']) || Path::new(raw).is_absolute() {
        return Err(UploadError::InvalidIdentity(format!(
            "absolute path not allowed: {raw}"
        )));
    }
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(UploadError::InvalidIdentity(format!(
            "drive prefix not allowed: {raw}"
        )));
    }

    let mut segments = Vec::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(UploadError::InvalidIdentity(format!(
                    "parent directory traversal not allowed: {raw}"
                )));
            }
            _ => {
                validate_segment(segment, "relative path")?;
                segments.push(segment.to_string());
            }
        }
    }
    Ok(segments)
}
