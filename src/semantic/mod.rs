//! Semantic search over conversation history.
//!
//! Messages are embedded into fixed-length vectors, kept in an exact
//! nearest-neighbor index next to their metadata, and persisted to a store
//! directory after every ingest.
//!
//! # Architecture
//!
//! - `embeddings`: `Embedder` contract and the fastembed-backed model
//! - `index`: in-memory vector index with exact Euclidean search
//! - `metadata`: records aligned with index ordinals
//! - `storage`: `vectors.bin` + `metadata.json` persistence
//! - `service`: `SemanticStore`, the only way to mutate index and metadata

pub mod embeddings;
mod error;
mod index;
mod metadata;
mod service;
mod storage;

pub use embeddings::{Embedder, EmbeddingError, EmbeddingModel};
pub use error::{StoreError, StoreErrorKind};
pub use index::{IndexError, Neighbor, VectorIndex};
pub use metadata::{MetadataError, MetadataStore, Record, RecordField};
pub use service::{
    similarity_from_distance, IngestResult, ScoredRecord, SemanticStore, StoreStats,
};
pub use storage::{LoadOutcome, PersistenceError, PersistenceLayer, METADATA_FILE, VECTORS_FILE};

/// Default embedding model (384-dimensional)
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Vector length produced by [`DEFAULT_MODEL`]
pub const DEFAULT_DIMENSION: usize = 384;

/// Default number of search results
pub const DEFAULT_TOP_K: usize = 5;
