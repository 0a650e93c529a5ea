//! Agent configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/chunkstage/agent.toml`
//! - Windows: `%APPDATA%/chunkstage/agent.toml`

use std::path::{Path, PathBuf};

use anyhow::Context;
use chunkstage_protocol::DEFAULT_MAX_CHUNK_BYTES;
use chunkstage_transfer::{DailyBucket, EngineConfig};
use serde::{Deserialize, Serialize};

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Where chunks and completion records are staged.
    #[serde(default = "default_staging_root")]
    pub staging_root: PathBuf,

    /// Where assembled files are published.
    #[serde(default = "default_final_root")]
    pub final_root: PathBuf,

    /// Largest accepted chunk in bytes.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: u64,

    /// fsync every atomic replace.
    #[serde(default = "default_true")]
    pub sync_writes: bool,

    /// UTC offset of the daily session buckets, in minutes.
    #[serde(default = "default_session_offset")]
    pub session_utc_offset_minutes: i32,

    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_staging_root() -> PathBuf {
    PathBuf::from("./uploads/ssd_temp")
}

fn default_final_root() -> PathBuf {
    PathBuf::from("/mnt/uploads/data")
}

fn default_max_chunk_bytes() -> u64 {
    DEFAULT_MAX_CHUNK_BYTES
}

fn default_true() -> bool {
    true
}

fn default_session_offset() -> i32 {
    330
}

fn default_log_filter() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            staging_root: default_staging_root(),
            final_root: default_final_root(),
            max_chunk_bytes: default_max_chunk_bytes(),
            sync_writes: default_true(),
            session_utc_offset_minutes: default_session_offset(),
            log_filter: default_log_filter(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the platform default), creating
    /// it with defaults if not found.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(&self.staging_root, &self.final_root)
            .with_max_chunk_bytes(self.max_chunk_bytes)
            .with_sync_writes(self.sync_writes)
    }

    pub fn session_clock(&self) -> anyhow::Result<DailyBucket> {
        DailyBucket::from_offset_minutes(self.session_utc_offset_minutes).with_context(|| {
            format!(
                "session_utc_offset_minutes out of range: {}",
                self.session_utc_offset_minutes
            )
        })
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("chunkstage").join("agent.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("chunkstage")
            .join("agent.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.staging_root, PathBuf::from("./uploads/ssd_temp"));
        assert_eq!(config.final_root, PathBuf::from("/mnt/uploads/data"));
        assert_eq!(config.max_chunk_bytes, 10 * 1024 * 1024 * 1024);
        assert!(config.sync_writes);
        assert_eq!(config.session_utc_offset_minutes, 330);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn config_partial_toml() {
        // Only specify the roots, rest should use defaults.
        let toml_str = r#"
            staging_root = "/data/staging"
            final_root = "/data/final"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.staging_root, PathBuf::from("/data/staging"));
        assert!(config.sync_writes);
        assert_eq!(config.max_chunk_bytes, DEFAULT_MAX_CHUNK_BYTES);
    }

    #[test]
    fn load_creates_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("agent.toml");

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent.toml");
        let config = Config {
            max_chunk_bytes: 1024,
            sync_writes: false,
            log_filter: "debug".into(),
            ..Config::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agent.toml");
        std::fs::write(&path, "max_chunk_bytes = \"lots\"").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn engine_config_mirrors_fields() {
        let config = Config {
            staging_root: "/a".into(),
            final_root: "/b".into(),
            max_chunk_bytes: 77,
            sync_writes: false,
            ..Config::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.staging_root, PathBuf::from("/a"));
        assert_eq!(engine.final_root, PathBuf::from("/b"));
        assert_eq!(engine.max_chunk_bytes, 77);
        assert!(!engine.sync_writes);
    }

    #[test]
    fn session_offset_validated() {
        let config = Config {
            session_utc_offset_minutes: 100_000,
            ..Config::default()
        };
        assert!(config.session_clock().is_err());
        assert!(Config::default().session_clock().is_ok());
    }

    #[test]
    fn config_path_not_empty() {
        let path = config_path().unwrap();
        assert!(path.to_string_lossy().contains("chunkstage"));
    }
}
