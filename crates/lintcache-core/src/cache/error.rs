use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the cache layer.
///
/// None of these abort an analysis run: loading degrades to a cold start and
/// only `save` hands them back to the caller.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode or decode snapshot: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("failed to encode snapshot as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("inconsistent snapshot: {0}")]
    Inconsistent(String),
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
