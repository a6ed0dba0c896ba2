// src/error.rs
use std::io;
use std::path::{Path, PathBuf};

use crate::types::Os;

pub type Result<T, E = ResetError> = std::result::Result<T, E>;

/// Every failure the engine can surface to a caller.
///
/// Scan-time problems are not errors: they travel as [`crate::types::ScanWarning`]
/// values next to the findings they affect.
#[derive(Debug, thiserror::Error)]
pub enum ResetError {
    #[error("no path templates for product '{product}' on {os}")]
    UnsupportedOs { product: String, os: Os },

    #[error("unknown product '{0}'")]
    UnknownProduct(String),

    #[error("path template '{template}' is invalid: {reason}")]
    Template { template: String, reason: String },

    #[error("could not determine the {root} directory for this platform")]
    MissingRoot { root: &'static str },

    #[error("backup failed for {path}: {source}")]
    BackupIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{product} is running (process '{process}'); close it before cleaning")]
    TargetProcessRunning { product: String, process: String },

    #[error("{path} is busy (held open by another process)")]
    ResourceBusy { path: PathBuf },

    #[error("mutation of {path} failed: {reason}")]
    Mutation { path: PathBuf, reason: String },

    #[error("restore of {path} failed verification: {reason}")]
    RestoreVerification { path: PathBuf, reason: String },

    #[error("backup set '{0}' not found")]
    BackupSetNotFound(String),

    #[error("another run holds the lock at {0}")]
    RunInProgress(PathBuf),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResetError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        ResetError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn mutation(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        ResetError::Mutation {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ResetError::UnsupportedOs { .. } => "UnsupportedOS",
            ResetError::UnknownProduct(_) => "UnknownProduct",
            ResetError::Template { .. } => "Template",
            ResetError::MissingRoot { .. } => "MissingRoot",
            ResetError::BackupIo { .. } => "BackupIOError",
            ResetError::TargetProcessRunning { .. } => "TargetProcessRunning",
            ResetError::ResourceBusy { .. } => "ResourceBusy",
            ResetError::Mutation { .. } => "MutationError",
            ResetError::RestoreVerification { .. } => "RestoreVerificationError",
            ResetError::BackupSetNotFound(_) => "BackupSetNotFound",
            ResetError::RunInProgress(_) => "RunInProgress",
            ResetError::InvalidOptions(_) => "InvalidOptions",
            ResetError::Cancelled => "Cancelled",
            ResetError::Io { .. } => "Io",
            ResetError::Sqlite(_) => "Sqlite",
            ResetError::Json(_) => "Json",
        }
    }
}

pub(crate) fn is_sqlite_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
    )
}

// Lock contention on a target artifact becomes ResourceBusy.
pub(crate) fn from_target_sqlite(path: &Path, err: rusqlite::Error) -> ResetError {
    if is_sqlite_busy(&err) {
        ResetError::ResourceBusy {
            path: path.to_path_buf(),
        }
    } else {
        ResetError::mutation(path, err.to_string())
    }
}
