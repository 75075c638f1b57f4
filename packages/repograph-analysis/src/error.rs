//! Error types for the analysis pipeline.
//!
//! The split matters more than the shapes: per-file errors (`FileRead`,
//! `Parse`) never unwind the pipeline — they are logged, the file is
//! skipped, and the run continues. Pipeline-level errors mark the active
//! checkpoint `failed` and propagate to the caller.

use thiserror::Error;

use repograph_storage::StorageError;

pub type Result<T> = std::result::Result<T, AnalyzerError>;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// I/O failure while hashing or reading one file; the file is skipped
    #[error("file read error for {path}: {message}")]
    FileRead { path: String, message: String },

    /// A parser reported failure for one file; its contributions are skipped
    #[error("parse error for {path}: {message}")]
    Parse { path: String, message: String },

    /// Malformed build file; the module degrades to an empty build result
    #[error("build inspection error: {0}")]
    BuildInspect(String),

    /// A store batch failed after retries; fails the run
    #[error("store batch error: {0}")]
    StoreBatch(#[source] StorageError),

    /// Checkpoint write failed; the run continues with degraded resume safety
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Index state save failed; the next run behaves as a full reindex
    #[error("index state error: {0}")]
    IndexState(String),

    /// Cooperative cancellation was observed
    #[error("analysis cancelled")]
    Cancelled,

    /// Invalid configuration (bad ignore glob, empty extension set, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// An analysis is already running for this repository in this process
    #[error("analysis already running for repository {0}")]
    RepositoryBusy(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AnalyzerError {
    pub fn file_read(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::FileRead {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error is isolated to a single file (skip + continue)
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::FileRead { .. } | Self::Parse { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_file_split() {
        assert!(AnalyzerError::file_read("/a", "denied").is_per_file());
        assert!(AnalyzerError::parse("/a", "bad token").is_per_file());
        assert!(!AnalyzerError::Cancelled.is_per_file());
        assert!(!AnalyzerError::Checkpoint("x".into()).is_per_file());
    }

    #[test]
    fn test_display() {
        let err = AnalyzerError::parse("/repo/a.java", "unexpected eof");
        assert_eq!(
            err.to_string(),
            "parse error for /repo/a.java: unexpected eof"
        );
    }
}
