// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for Haul
#[derive(Error, Debug)]
pub enum Error {
    /// Package, bucket, or install record absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// A document parsed but violates a required shape
    #[error("Malformed {what}: {reason}")]
    Malformed { what: String, reason: String },

    /// Artifact hash mismatch after the allowed retry
    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    Unverified {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Network transfer failed
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Archive format or bucket variant not recognized
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Dependency chain cut off at the depth ceiling
    #[error("Dependency chain of '{package}' exceeds depth {depth}")]
    DepthExceeded { package: String, depth: usize },

    /// Dependency graph loops back onto a package still being resolved
    #[error("Cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// Name collision (e.g. duplicate bucket)
    #[error("Conflict: {0}")]
    ConflictError(String),

    /// The source list document cannot be used
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// External process failed to spawn or exited non-zero
    #[error("Process error: {0}")]
    ProcessError(String),

    /// Another instance holds the lock
    #[error("Another haul instance is running (lock held at {})", .0.display())]
    Busy(PathBuf),

    /// Cooperative cancellation requested
    #[error("Operation cancelled")]
    Cancelled,

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn malformed(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Malformed {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// True for outcomes that are expected absences rather than failures
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Result type alias using Haul's Error type
pub type Result<T> = std::result::Result<T, Error>;
