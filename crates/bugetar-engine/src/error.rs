//! Error types for the aggregation engine.

use std::time::Duration;

use bugetar_query::{CompileError, KeyError, QueryError, ValidationError};
use thiserror::Error;

/// Error returned by a storage backend.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The backend failed to run a query.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<QueryError> for StorageError {
    fn from(err: QueryError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Error returned by [`AggregationEngine::get_aggregates`](crate::AggregationEngine::get_aggregates).
///
/// Validation errors and timeouts display their cause. The other variants
/// display as a generic failure and carry the detail in their source.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The filter was rejected.
    #[error("invalid filter: {0}")]
    Validation(#[from] ValidationError),
    /// The filter could not be turned into a cache key.
    #[error("aggregation failed")]
    Key(#[source] KeyError),
    /// The filter validated but could not be compiled.
    #[error("aggregation failed")]
    Compilation(#[source] CompileError),
    /// The storage backend failed.
    #[error("aggregation failed")]
    Storage(#[source] StorageError),
    /// The storage queries did not finish in time.
    #[error("aggregation timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
    /// Euro conversion failed.
    #[error("aggregation failed")]
    Rates(#[source] QueryError),
}

impl EngineError {
    /// Whether repeating the same request may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Timeout(_))
    }
}

impl From<KeyError> for EngineError {
    fn from(err: KeyError) -> Self {
        Self::Key(err)
    }
}

impl From<CompileError> for EngineError {
    fn from(err: CompileError) -> Self {
        Self::Compilation(err)
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}
