//! Error taxonomy shared by every crate in the workspace.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The file extension is not one the loader understands.
    #[error("unsupported file type: .{0}")]
    UnsupportedFormat(String),

    /// The file exists in a supported format but could not be read or decoded.
    #[error("failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// A vector does not have the dimension the collection was created with.
    #[error("dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Ingestion was aborted; `committed` chunks were already stored.
    #[error("ingestion cancelled after {committed} chunks were committed")]
    Cancelled { committed: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The answer-synthesis endpoint failed or returned an unusable reply.
    #[error("answer synthesis error: {0}")]
    Answer(String),
}

impl Error {
    pub fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Load { path: path.into(), reason: reason.to_string() }
    }

    pub fn storage(reason: impl ToString) -> Self {
        Self::Storage(reason.to_string())
    }

    pub fn embedding(reason: impl ToString) -> Self {
        Self::Embedding(reason.to_string())
    }

    /// Whether a bounded retry may repeat the failed call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Embedding(_) | Self::Storage(_) | Self::Answer(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_names_the_extension() {
        let err = Error::UnsupportedFormat("xlsx".to_string());
        assert_eq!(err.to_string(), "unsupported file type: .xlsx");
    }

    #[test]
    fn load_error_includes_path_and_reason() {
        let err = Error::load("/tmp/missing.txt", "no such file");
        assert_eq!(err.to_string(), "failed to load /tmp/missing.txt: no such file");
    }

    #[test]
    fn dimension_mismatch_display() {
        let err = Error::DimensionMismatch { expected: 1024, actual: 384 };
        assert_eq!(err.to_string(), "dimension mismatch: collection expects 1024, got 384");
    }

    #[test]
    fn transient_classification() {
        assert!(Error::Timeout { operation: "embed".into(), after: Duration::from_secs(1) }.is_transient());
        assert!(Error::storage("disk busy").is_transient());
        assert!(Error::embedding("device lost").is_transient());
        assert!(!Error::UnsupportedFormat("exe".into()).is_transient());
        assert!(!Error::DimensionMismatch { expected: 3, actual: 4 }.is_transient());
        assert!(!Error::Cancelled { committed: 2 }.is_transient());
        assert!(!Error::load("a.pdf", "corrupt").is_transient());
    }
}
