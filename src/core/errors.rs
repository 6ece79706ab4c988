//! TMR-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::remote::Status;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Top-level error type for treemirror.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("[TMR-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[TMR-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[TMR-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[TMR-2001] index corrupt in {path}: {details}")]
    IndexCorrupt { path: PathBuf, details: String },

    #[error("[TMR-2002] index file {path} has invalid format: {details}")]
    IndexFormat { path: PathBuf, details: String },

    #[error("[TMR-2003] index directory {path} is locked by another process")]
    IndexLocked { path: PathBuf },

    #[error("[TMR-2004] index full: cannot address more than {limit} records")]
    IndexFull { limit: u32 },

    #[error("[TMR-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[TMR-2201] runaway retry on {path}: failed {failures} times")]
    RunawayRetry { path: String, failures: u32 },

    #[error("[TMR-2202] refresh aborted after {status} on {path:?}")]
    StepAborted { status: Status, path: String },

    #[error("[TMR-2203] refresh state invalid: {details}")]
    RefreshState { details: String },

    #[error("[TMR-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[TMR-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[TMR-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl MirrorError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "TMR-1001",
            Self::MissingConfig { .. } => "TMR-1002",
            Self::ConfigParse { .. } => "TMR-1003",
            Self::IndexCorrupt { .. } => "TMR-2001",
            Self::IndexFormat { .. } => "TMR-2002",
            Self::IndexLocked { .. } => "TMR-2003",
            Self::IndexFull { .. } => "TMR-2004",
            Self::Serialization { .. } => "TMR-2101",
            Self::RunawayRetry { .. } => "TMR-2201",
            Self::StepAborted { .. } => "TMR-2202",
            Self::RefreshState { .. } => "TMR-2203",
            Self::Io { .. } => "TMR-3002",
            Self::ChannelClosed { .. } => "TMR-3003",
            Self::Runtime { .. } => "TMR-3900",
        }
    }

    /// Whether retrying the whole pass later might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::IndexLocked { .. }
                | Self::RunawayRetry { .. }
                | Self::StepAborted { .. }
                | Self::ChannelClosed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for index corruption findings.
    #[must_use]
    pub fn corrupt(path: impl AsRef<Path>, details: impl Into<String>) -> Self {
        Self::IndexCorrupt {
            path: path.as_ref().to_path_buf(),
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for MirrorError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<MirrorError> {
        vec![
            MirrorError::InvalidConfig {
                details: String::new(),
            },
            MirrorError::MissingConfig {
                path: PathBuf::new(),
            },
            MirrorError::ConfigParse {
                context: "",
                details: String::new(),
            },
            MirrorError::IndexCorrupt {
                path: PathBuf::new(),
                details: String::new(),
            },
            MirrorError::IndexFormat {
                path: PathBuf::new(),
                details: String::new(),
            },
            MirrorError::IndexLocked {
                path: PathBuf::new(),
            },
            MirrorError::IndexFull { limit: 0 },
            MirrorError::Serialization {
                context: "",
                details: String::new(),
            },
            MirrorError::RunawayRetry {
                path: String::new(),
                failures: 0,
            },
            MirrorError::StepAborted {
                status: Status::Conflict,
                path: String::new(),
            },
            MirrorError::RefreshState {
                details: String::new(),
            },
            MirrorError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            MirrorError::ChannelClosed { component: "" },
            MirrorError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(MirrorError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_starts_with_bracketed_code() {
        for err in all_variants() {
            let msg = err.to_string();
            assert!(
                msg.starts_with(&format!("[{}]", err.code())),
                "display should lead with its code: {msg}"
            );
            assert!(err.code().starts_with("TMR-"));
        }
    }

    #[test]
    fn corruption_is_not_retryable() {
        assert!(!MirrorError::corrupt("/idx", "loop").is_retryable());
        assert!(
            !MirrorError::InvalidConfig {
                details: String::new()
            }
            .is_retryable()
        );
        assert!(MirrorError::IndexLocked {
            path: PathBuf::from("/idx")
        }
        .is_retryable());
        assert!(
            MirrorError::RunawayRetry {
                path: "a/b".to_string(),
                failures: 3
            }
            .is_retryable()
        );
    }

    #[test]
    fn step_aborted_names_status_and_path() {
        let err = MirrorError::StepAborted {
            status: Status::Conflict,
            path: "docs/a.txt".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("conflict"), "{msg}");
        assert!(msg.contains("docs/a.txt"), "{msg}");
    }

    #[test]
    fn io_convenience_constructor() {
        let err = MirrorError::io(
            "/tmp/record",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "TMR-3002");
        assert!(err.to_string().contains("/tmp/record"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: MirrorError = json_err.into();
        assert_eq!(err.code(), "TMR-2101");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: MirrorError = toml_err.into();
        assert_eq!(err.code(), "TMR-1003");
    }
}
