//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{MirrorError, Result};
use crate::core::paths::resolve_absolute_path;
use crate::remote::local::STAGING_DIR;

/// Full treemirror configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub remote: RemoteConfig,
    pub refresh: RefreshConfig,
    pub ignore: IgnoreConfig,
    /// Backup roots keyed by name; the name is also the remote root directory.
    pub backups: BTreeMap<String, PathBuf>,
}

/// Filesystem paths used by treemirror.
///
/// Empty `record_dir`, `ignore_file` and `jsonl_log` are derived from `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub record_dir: PathBuf,
    pub ignore_file: PathBuf,
    pub jsonl_log: PathBuf,
}

/// Remote transport kinds shipped with the agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemoteKind {
    /// A locally reachable directory (mounted share, second disk).
    #[default]
    Local,
}

/// Remote destination settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteConfig {
    pub kind: RemoteKind,
    pub target: PathBuf,
    pub chunk_size_bytes: u64,
}

/// Refresh engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefreshConfig {
    /// Stored and physical mtimes within this many seconds count as equal.
    pub mtime_slack_secs: u32,
    /// Failures tolerated per path before the scan aborts.
    pub max_path_failures: u32,
    /// Re-upload pending (previously locked) files on every pass.
    pub retry_pending: bool,
}

/// Extra ignore patterns evaluated after the ignore file's own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct IgnoreConfig {
    pub patterns: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[TMR-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        let cfg = home_dir.join(".config").join("treemirror").join("config.toml");
        let data = home_dir.join(".local").join("share").join("treemirror");
        Self {
            config_file: cfg,
            record_dir: data.join("records"),
            ignore_file: data.join("ignore"),
            jsonl_log: data.join("activity.jsonl"),
            data_dir: data,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            kind: RemoteKind::Local,
            target: PathBuf::new(),
            chunk_size_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            mtime_slack_secs: 10,
            max_path_failures: 2,
            retry_pending: true,
        }
    }
}

impl PathsConfig {
    /// Record directory for one backup root.
    #[must_use]
    pub fn root_record_dir(&self, name: &str) -> PathBuf {
        self.record_dir.join(name)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| MirrorError::Io {
                path: path_buf.clone(),
                source,
            })?;
            Self::from_toml_str(&raw)?
        } else if is_explicit_path {
            return Err(MirrorError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without env overrides or validation.
    ///
    /// Derived paths left out of the document stay empty so that
    /// `normalize_paths` can rebuild them under a custom `data_dir`.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(raw)?;
        let mut parsed: Self = toml::from_str(raw)?;
        let paths = value.get("paths");
        let has = |key: &str| paths.and_then(|p| p.get(key)).is_some();
        if has("data_dir") {
            if !has("record_dir") {
                parsed.paths.record_dir = PathBuf::new();
            }
            if !has("ignore_file") {
                parsed.paths.ignore_file = PathBuf::new();
            }
            if !has("jsonl_log") {
                parsed.paths.jsonl_log = PathBuf::new();
            }
        }
        Ok(parsed)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// Uses FNV-1a for cross-process-stable hashing.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("TMIR_PATHS_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(raw);
            self.paths.record_dir = PathBuf::new();
            self.paths.ignore_file = PathBuf::new();
            self.paths.jsonl_log = PathBuf::new();
        }
        if let Some(raw) = lookup("TMIR_REMOTE_TARGET") {
            self.remote.target = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("TMIR_REMOTE_CHUNK_SIZE_BYTES") {
            self.remote.chunk_size_bytes = parse_env_u64("TMIR_REMOTE_CHUNK_SIZE_BYTES", &raw)?;
        }
        if let Some(raw) = lookup("TMIR_REFRESH_MTIME_SLACK_SECS") {
            self.refresh.mtime_slack_secs =
                parse_env_u32("TMIR_REFRESH_MTIME_SLACK_SECS", &raw)?;
        }
        if let Some(raw) = lookup("TMIR_REFRESH_MAX_PATH_FAILURES") {
            self.refresh.max_path_failures =
                parse_env_u32("TMIR_REFRESH_MAX_PATH_FAILURES", &raw)?;
        }
        if let Some(raw) = lookup("TMIR_REFRESH_RETRY_PENDING") {
            self.refresh.retry_pending = parse_env_bool("TMIR_REFRESH_RETRY_PENDING", &raw)?;
        }
        Ok(())
    }

    /// Strip trailing slashes, anchor relative backup roots at the working
    /// directory, and derive unset paths from `data_dir`.
    fn normalize_paths(&mut self) {
        for path in self.backups.values_mut() {
            strip_trailing_slash(path);
            if path.is_relative() && !path.as_os_str().is_empty() {
                *path = resolve_absolute_path(path);
            }
        }
        strip_trailing_slash(&mut self.remote.target);
        strip_trailing_slash(&mut self.paths.data_dir);

        let data = self.paths.data_dir.clone();
        if self.paths.record_dir.as_os_str().is_empty() {
            self.paths.record_dir = data.join("records");
        }
        if self.paths.ignore_file.as_os_str().is_empty() {
            self.paths.ignore_file = data.join("ignore");
        }
        if self.paths.jsonl_log.as_os_str().is_empty() {
            self.paths.jsonl_log = data.join("activity.jsonl");
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (name, path) in &self.backups {
            if name.is_empty()
                || name == "."
                || name == ".."
                || name.contains('/')
                || name.contains('\\')
            {
                return Err(MirrorError::InvalidConfig {
                    details: format!("backups: invalid backup name {name:?}"),
                });
            }
            if name.eq_ignore_ascii_case(STAGING_DIR) {
                return Err(MirrorError::InvalidConfig {
                    details: format!("backups: name {name:?} is reserved for staged uploads"),
                });
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(MirrorError::InvalidConfig {
                    details: format!("backups: name {name:?} differs from another only by case"),
                });
            }
            if path.as_os_str().is_empty() {
                return Err(MirrorError::InvalidConfig {
                    details: format!("backups.{name} must name a directory"),
                });
            }
        }

        if !self.backups.is_empty() && self.remote.target.as_os_str().is_empty() {
            return Err(MirrorError::InvalidConfig {
                details: "remote.target must be set when backups are configured".to_string(),
            });
        }

        if self.remote.chunk_size_bytes < 4096 {
            return Err(MirrorError::InvalidConfig {
                details: format!(
                    "remote.chunk_size_bytes ({}) must be >= 4096",
                    self.remote.chunk_size_bytes
                ),
            });
        }

        if self.refresh.max_path_failures == 0 {
            return Err(MirrorError::InvalidConfig {
                details: "refresh.max_path_failures must be >= 1".to_string(),
            });
        }

        if self.refresh.mtime_slack_secs > 86_400 {
            return Err(MirrorError::InvalidConfig {
                details: format!(
                    "refresh.mtime_slack_secs ({}) must be <= 86400",
                    self.refresh.mtime_slack_secs
                ),
            });
        }

        for pattern in &self.ignore.patterns {
            crate::scanner::ignore::validate_pattern(pattern)?;
        }

        Ok(())
    }
}

fn strip_trailing_slash(path: &mut PathBuf) {
    let s = path.to_string_lossy();
    if s.len() > 1
        && let Some(stripped) = s.strip_suffix('/')
    {
        *path = PathBuf::from(stripped);
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|error| MirrorError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_u32(name: &str, raw: &str) -> Result<u32> {
    raw.parse::<u32>().map_err(|error| MirrorError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.parse::<bool>().map_err(|error| MirrorError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
