use crate::semantic::embeddings::EmbeddingError;
use crate::semantic::index::IndexError;
use crate::semantic::metadata::MetadataError;
use crate::semantic::storage::PersistenceError;

/// Errors returned by [`SemanticStore`](crate::semantic::SemanticStore).
///
/// Unusable artifacts at startup are not errors: the store starts empty and
/// reports it through [`LoadOutcome`](crate::semantic::LoadOutcome).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Ordinal {ordinal} has no record ({len} records stored)")]
    IndexOutOfRange { ordinal: usize, len: usize },

    #[error("Embedding error: {0}")]
    EmbeddingFailure(#[from] EmbeddingError),

    #[error("Storage error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Store directory is in use: {0}")]
    Locked(std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Discriminant of [`StoreError`], for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    DimensionMismatch,
    InvalidArgument,
    IndexOutOfRange,
    EmbeddingFailure,
    Persistence,
    Locked,
    Internal,
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::DimensionMismatch { .. } => StoreErrorKind::DimensionMismatch,
            StoreError::InvalidArgument(_) => StoreErrorKind::InvalidArgument,
            StoreError::IndexOutOfRange { .. } => StoreErrorKind::IndexOutOfRange,
            StoreError::EmbeddingFailure(_) => StoreErrorKind::EmbeddingFailure,
            StoreError::Persistence(_) => StoreErrorKind::Persistence,
            StoreError::Locked(_) => StoreErrorKind::Locked,
            StoreError::Internal(_) => StoreErrorKind::Internal,
        }
    }
}

impl From<IndexError> for StoreError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, got } => {
                StoreError::DimensionMismatch { expected, got }
            }
            IndexError::ZeroDimensions => StoreError::InvalidArgument(err.to_string()),
            // only embedder output reaches the index
            IndexError::NonFinite { .. } => {
                StoreError::EmbeddingFailure(EmbeddingError::EmbeddingFailed(err.to_string()))
            }
        }
    }
}

impl From<MetadataError> for StoreError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::IndexOutOfRange { ordinal, len } => {
                StoreError::IndexOutOfRange { ordinal, len }
            }
            // bodies are filtered before they reach the metadata store
            MetadataError::EmptyBody { .. } => StoreError::Internal(err.to_string()),
        }
    }
}
