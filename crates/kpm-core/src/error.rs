//! Core error type.
//!
//! Resolution problems (unresolved libraries, conflicts) are not errors; they
//! are reported as [`crate::graph::Diagnostic`]s. This type covers failures
//! that abort an operation: repository I/O, lock timeouts, remote transport.

use std::path::PathBuf;
use thiserror::Error;

/// Stable error codes, one per [`Error`] variant.
pub mod codes {
    pub const IO_ERROR: &str = "IO_ERROR";
    pub const RECORD_INVALID: &str = "RECORD_INVALID";
    pub const RECORD_EXISTS: &str = "RECORD_EXISTS";
    pub const ARTIFACT_MISSING: &str = "ARTIFACT_MISSING";
    pub const ARTIFACT_PATH_INVALID: &str = "ARTIFACT_PATH_INVALID";
    pub const LOCK_TIMEOUT: &str = "LOCK_TIMEOUT";
    pub const REMOTE_UNREACHABLE: &str = "REMOTE_UNREACHABLE";
    pub const REMOTE_STATUS: &str = "REMOTE_STATUS";
    pub const REMOTE_URL_INVALID: &str = "REMOTE_URL_INVALID";
    pub const MANIFEST_INVALID: &str = "MANIFEST_INVALID";
    pub const OTHER: &str = "OTHER";
}

/// Core error type for kpm operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {location}: {source}")]
    RecordInvalid {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Change record {index} already exists in {location}")]
    RecordExists { location: String, index: u32 },

    #[error("Artifact {artifact} not found in {location}")]
    ArtifactMissing { location: String, artifact: String },

    #[error("Invalid artifact path '{artifact}'")]
    ArtifactPathInvalid { artifact: String },

    #[error("Timed out acquiring lock {name} after {attempts} attempts")]
    LockTimeout { name: String, attempts: u32 },

    #[error("Request to {url} failed: {source}")]
    RemoteUnreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} returned HTTP {status}")]
    RemoteStatus { url: String, status: u16 },

    #[error("Invalid repository URL '{url}': {message}")]
    RemoteUrlInvalid { url: String, message: String },

    #[error("Invalid manifest at {path}: {message}")]
    ManifestInvalid { path: PathBuf, message: String },

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Attach a path to an I/O error.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => codes::IO_ERROR,
            Self::RecordInvalid { .. } => codes::RECORD_INVALID,
            Self::RecordExists { .. } => codes::RECORD_EXISTS,
            Self::ArtifactMissing { .. } => codes::ARTIFACT_MISSING,
            Self::ArtifactPathInvalid { .. } => codes::ARTIFACT_PATH_INVALID,
            Self::LockTimeout { .. } => codes::LOCK_TIMEOUT,
            Self::RemoteUnreachable { .. } => codes::REMOTE_UNREACHABLE,
            Self::RemoteStatus { .. } => codes::REMOTE_STATUS,
            Self::RemoteUrlInvalid { .. } => codes::REMOTE_URL_INVALID,
            Self::ManifestInvalid { .. } => codes::MANIFEST_INVALID,
            Self::Other(_) => codes::OTHER,
        }
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_screaming_snake_case() {
        let all = [
            codes::IO_ERROR,
            codes::RECORD_INVALID,
            codes::RECORD_EXISTS,
            codes::ARTIFACT_MISSING,
            codes::ARTIFACT_PATH_INVALID,
            codes::LOCK_TIMEOUT,
            codes::REMOTE_UNREACHABLE,
            codes::REMOTE_STATUS,
            codes::REMOTE_URL_INVALID,
            codes::MANIFEST_INVALID,
            codes::OTHER,
        ];

        for code in all {
            assert!(
                code.chars().all(|c| c.is_ascii_uppercase() || c == '_'),
                "Error code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }

    #[test]
    fn test_record_exists_message_and_code() {
        let err = Error::RecordExists {
            location: "/repo".to_string(),
            index: 3,
        };
        assert_eq!(err.code(), codes::RECORD_EXISTS);
        assert!(err.to_string().contains("Change record 3"));
    }
}
