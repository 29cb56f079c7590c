use std::path::PathBuf;

use thiserror::Error;
use tgsync_adapters::SourceError;
use tgsync_storage::{CacheError, StoreError};

/// Failure of one import unit (an order month or a client file). Caught at the scope boundary,
/// reported, and never propagated past it.
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("{} が見つかりません", .0.display())]
    SourceNotFound(PathBuf),
    #[error(transparent)]
    Source(SourceError),
    /// The store could not be read or written; the cache is left untouched.
    #[error("record store unavailable: {0}")]
    RemoteUnavailable(#[from] StoreError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Local(#[from] anyhow::Error),
}

impl From<SourceError> for ScopeError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(path) => Self::SourceNotFound(path),
            other => Self::Source(other),
        }
    }
}
