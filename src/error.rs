use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading a file or interpreting an anchor.
///
/// These are the failures of a single read-only operation. Batch application
/// never propagates them as a whole; it folds them into per-target outcomes
/// (see [`crate::applier::FailureReason`]).
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("File is not readable: {path}: {reason}")]
    NotReadable { path: PathBuf, reason: String },

    #[error("Invalid anchor: prefix must not be empty")]
    InvalidAnchor,

    #[error("New value for {path}:{line} spans multiple lines")]
    InvalidValue { path: PathBuf, line: usize },

    #[error("New value for {path}:{line} cannot be written as {encoding}")]
    Unencodable {
        path: PathBuf,
        line: usize,
        encoding: &'static str,
    },
}

impl PatchError {
    pub(crate) fn not_readable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PatchError::NotReadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
