use std::path::PathBuf;
use thiserror::Error;

/// A table file failed validation: checksum mismatch, malformed record, or
/// inconsistent metadata.
///
/// Returned inside [`anyhow::Error`]; use `err.downcast_ref::<CorruptionError>()`
/// to tell corruption apart from plain I/O failures. A table that reports
/// corruption must not be served.
#[derive(Debug, Error)]
#[error("sstable corrupted ({}): {reason}", path.display())]
pub struct CorruptionError {
    pub path: PathBuf,
    pub reason: String,
}

impl CorruptionError {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Returns `true` if `err` (or anything in its context chain) is a [`CorruptionError`].
pub fn is_corruption(err: &anyhow::Error) -> bool {
    err.chain().any(|e| e.is::<CorruptionError>())
}
