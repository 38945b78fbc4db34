//! Semantic store over conversation history.
//!
//! Binds the vector index and the record store into one table:
//! - ingest embeds message bodies and appends vectors and records together
//! - search embeds the query and ranks stored messages by distance
//! - every successful ingest is flushed to disk before it returns
//!
//! Both halves sit behind one `RwLock`. Ingest holds the write lock from
//! embedding through the flush; search holds the read lock, so it never sees
//! the two halves at different lengths.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::lock::FileLock;
use crate::message::Message;
use crate::semantic::embeddings::{Embedder, EmbeddingError};
use crate::semantic::error::StoreError;
use crate::semantic::index::VectorIndex;
use crate::semantic::metadata::{MetadataStore, Record, RecordField};
use crate::semantic::storage::{LoadOutcome, PersistenceLayer};

/// Smallest similarity ever reported. Rounding would otherwise turn very
/// distant matches into 0.
const MIN_REPORTED_SIMILARITY: f64 = 0.0001;

/// Result of one ingest call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResult {
    pub stored: usize,
}

/// A stored record ranked against a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub record: Record,
    /// Squared Euclidean distance, 4 decimals
    pub distance: f64,
    /// `1 / (1 + distance)`, 4 decimals, in (0, 1]
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_vectors: usize,
    pub dimension: usize,
    pub distinct_conversations: usize,
}

/// Map a distance to a similarity in (0, 1]. Distance 0 maps to 1.
pub fn similarity_from_distance(distance: f64) -> f64 {
    1.0 / (1.0 + distance.max(0.0))
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// The vector index and its records. Only `append` grows them.
struct Tables {
    index: VectorIndex,
    metadata: MetadataStore,
}

impl Tables {
    fn len(&self) -> usize {
        self.index.len()
    }

    /// Append vectors and records as one unit: either both grow or neither does.
    fn append(&mut self, vectors: &[Vec<f32>], records: Vec<Record>) -> Result<(), StoreError> {
        if vectors.len() != records.len() {
            return Err(StoreError::Internal(format!(
                "{} vectors for {} records",
                vectors.len(),
                records.len()
            )));
        }

        let before = self.len();
        self.index.add(vectors)?;
        if let Err(e) = self.metadata.append(records) {
            self.index.truncate(before);
            return Err(e.into());
        }
        Ok(())
    }

    fn truncate(&mut self, len: usize) {
        self.index.truncate(len);
        self.metadata.truncate(len);
    }
}

/// Embedding-backed, persistent store of conversation messages.
///
/// Construct one per store directory and share it by reference; it is
/// `Send + Sync`.
pub struct SemanticStore {
    embedder: Box<dyn Embedder>,
    persistence: PersistenceLayer,
    model_id: [u8; 32],
    dimension: usize,
    tables: RwLock<Tables>,
    load_outcome: LoadOutcome,
    _lock: FileLock,
}

impl SemanticStore {
    /// Open (creating if needed) the store in `dir`.
    ///
    /// Prior state is loaded from disk. Missing or unusable artifacts start the
    /// store empty; check [`load_outcome`](Self::load_outcome) to tell the cases
    /// apart. Fails if `dimension` is zero, if the embedder produces vectors of
    /// another length, or if another handle has the directory open.
    pub fn open(
        dir: impl Into<PathBuf>,
        dimension: usize,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        if dimension == 0 {
            return Err(StoreError::InvalidArgument(
                "dimension must be greater than zero".to_string(),
            ));
        }
        if embedder.dimensions() != dimension {
            return Err(StoreError::DimensionMismatch {
                expected: dimension,
                got: embedder.dimensions(),
            });
        }

        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Persistence(e.into()))?;
        let lock = FileLock::try_acquire(&dir).map_err(StoreError::Locked)?;

        let persistence = PersistenceLayer::new(dir);
        let model_id = embedder.model_id_hash();
        let (index, metadata, load_outcome) = persistence.load_or_empty(&model_id, dimension);

        log::info!(
            "Opened semantic store at {} with model '{}' ({} entries)",
            persistence.dir().display(),
            embedder.name(),
            index.len()
        );

        Ok(Self {
            embedder,
            persistence,
            model_id,
            dimension,
            tables: RwLock::new(Tables { index, metadata }),
            load_outcome,
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        self.persistence.dir()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// What `open` found on disk.
    pub fn load_outcome(&self) -> &LoadOutcome {
        &self.load_outcome
    }

    /// Number of stored messages.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Embed and store the non-empty messages of one conversation.
    ///
    /// Messages without a body are skipped. Messages without an id get
    /// `msg_<position>`, position counted over the whole `messages` slice.
    /// `annotations` is copied into every stored record. On any error the
    /// store is left exactly as it was.
    pub fn ingest(
        &self,
        conversation_id: &str,
        messages: &[Message],
        annotations: Option<Map<String, Value>>,
    ) -> Result<IngestResult, StoreError> {
        if conversation_id.is_empty() {
            return Err(StoreError::InvalidArgument(
                "conversation id must not be empty".to_string(),
            ));
        }

        let _span = tracing::info_span!("ingest", conversation = conversation_id).entered();

        let kept: Vec<(usize, &Message)> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.body.is_empty())
            .collect();

        if kept.is_empty() {
            log::warn!("No text content in messages for conversation {}", conversation_id);
            return Ok(IngestResult { stored: 0 });
        }

        let texts: Vec<String> = kept.iter().map(|(_, m)| m.body.clone()).collect();
        let annotations = annotations.unwrap_or_default();
        let records: Vec<Record> = kept
            .iter()
            .map(|(position, m)| Record {
                conversation_id: conversation_id.to_string(),
                message_id: m
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("msg_{}", position)),
                body: m.body.clone(),
                author_id: m.user_id.clone().unwrap_or_default(),
                timestamp: m.effective_timestamp().cloned(),
                annotations: annotations.clone(),
            })
            .collect();

        let mut tables = self.write()?;

        log::debug!("Generating embeddings for {} messages", texts.len());
        let vectors = self.embed(&texts)?;

        let before = tables.len();
        tables.append(&vectors, records)?;

        if let Err(e) = self
            .persistence
            .save(&tables.index, &tables.metadata, &self.model_id)
        {
            log::error!("Failed to save store, discarding ingest: {}", e);
            tables.truncate(before);
            return Err(e.into());
        }

        log::info!(
            "Stored conversation {} with {} messages",
            conversation_id,
            texts.len()
        );
        Ok(IngestResult {
            stored: texts.len(),
        })
    }

    /// The `top_k` stored messages closest to `query`, most similar first.
    ///
    /// Returns an empty list when nothing has been stored.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredRecord>, StoreError> {
        if top_k == 0 {
            return Err(StoreError::InvalidArgument(
                "top_k must be greater than zero".to_string(),
            ));
        }
        if query.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "query must not be empty".to_string(),
            ));
        }

        let _span = tracing::debug_span!("search", top_k).entered();
        let tables = self.read()?;

        if tables.index.is_empty() {
            log::warn!("Index is empty, no results to return");
            return Ok(vec![]);
        }

        let query_vector = self
            .embed(&[query.to_string()])?
            .pop()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))?;

        let k = top_k.min(tables.index.len());
        let neighbors = tables.index.search(&query_vector, k)?;

        let mut results = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let record = tables.metadata.get(neighbor.ordinal)?.clone();
            let distance = f64::from(neighbor.distance);
            results.push(ScoredRecord {
                record,
                distance: round4(distance),
                similarity: round4(similarity_from_distance(distance)).max(MIN_REPORTED_SIMILARITY),
            });
        }

        log::info!(
            "Search returned {} results for query: {}",
            results.len(),
            query.chars().take(50).collect::<String>()
        );
        Ok(results)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let tables = self.read()?;
        Ok(StoreStats {
            total_vectors: tables.index.len(),
            dimension: self.dimension,
            distinct_conversations: tables.metadata.count_distinct(RecordField::ConversationId),
        })
    }

    /// Embed `texts`, checking that one vector came back per text.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        let vectors = self.embedder.embed(texts)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            }
            .into());
        }
        Ok(vectors)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|e| StoreError::Internal(format!("Lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|e| StoreError::Internal(format!("Lock poisoned: {}", e)))
    }

    /// Lengths of the vector index and the record store.
    #[cfg(test)]
    pub(crate) fn table_sizes(&self) -> (usize, usize) {
        let tables = self.read().unwrap();
        (tables.index.len(), tables.metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::error::StoreErrorKind;
    use crate::tests::support::{FaultyEmbedder, Fault, KeywordEmbedder};

    const VOCABULARY: &[&str] = &["server", "outage", "down", "thanks", "help", "the", "is", "for"];

    fn open(dir: &Path) -> SemanticStore {
        SemanticStore::open(
            dir,
            VOCABULARY.len(),
            Box::new(KeywordEmbedder::new(VOCABULARY)),
        )
        .unwrap()
    }

    #[test]
    fn test_similarity_is_bounded() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        for distance in [1e-6, 0.5, 1.0, 4.0, 1e3, 1e9, f64::MAX] {
            let similarity = similarity_from_distance(distance);
            assert!(similarity > 0.0 && similarity <= 1.0, "distance {distance}");
        }
        assert!(similarity_from_distance(1.0) > similarity_from_distance(2.0));
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round4(1.0), 1.0);
    }

    #[test]
    fn test_open_rejects_zero_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let result = SemanticStore::open(dir.path(), 0, Box::new(KeywordEmbedder::new(&[])));
        assert_eq!(result.err().map(|e| e.kind()), Some(StoreErrorKind::InvalidArgument));
    }

    #[test]
    fn test_open_rejects_embedder_of_other_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            SemanticStore::open(dir.path(), 384, Box::new(KeywordEmbedder::new(VOCABULARY)));
        assert_eq!(result.err().map(|e| e.kind()), Some(StoreErrorKind::DimensionMismatch));
    }

    #[cfg(unix)]
    #[test]
    fn test_second_handle_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let _store = open(dir.path());

        let second = SemanticStore::open(
            dir.path(),
            VOCABULARY.len(),
            Box::new(KeywordEmbedder::new(VOCABULARY)),
        );
        assert_eq!(second.err().map(|e| e.kind()), Some(StoreErrorKind::Locked));
    }

    #[test]
    fn test_empty_body_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());

        let result = store
            .ingest("c1", &[Message::new(""), Message::new("hello")], None)
            .unwrap();

        assert_eq!(result.stored, 1);
        assert_eq!(store.table_sizes(), (1, 1));
        let hit = &store.search("hello", 5).unwrap()[0];
        assert_eq!(hit.record.body, "hello");
        assert_eq!(hit.record.message_id, "msg_1");
    }

    #[test]
    fn test_all_empty_bodies_store_nothing_and_skip_the_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());

        let result = store
            .ingest("c1", &[Message::new(""), Message::new("")], None)
            .unwrap();

        assert_eq!(result.stored, 0);
        assert!(store.is_empty().unwrap());
        assert!(!dir.path().join("vectors.bin").exists());
    }

    #[test]
    fn test_record_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());

        let mut annotations = Map::new();
        annotations.insert("room".to_string(), Value::from("ops"));

        let mut matrix = Message::new("the server is down").with_user("@ops:example.org");
        matrix.origin_server_ts = Some(crate::message::Timestamp::Millis(1_700_000_000_000));

        store
            .ingest(
                "c1",
                &[matrix, Message::new("thanks").with_id("m2")],
                Some(annotations),
            )
            .unwrap();

        let results = store.search("server down", 2).unwrap();
        let first = &results[0].record;
        assert_eq!(first.conversation_id, "c1");
        assert_eq!(first.message_id, "msg_0");
        assert_eq!(first.author_id, "@ops:example.org");
        assert_eq!(
            first.timestamp,
            Some(crate::message::Timestamp::Millis(1_700_000_000_000))
        );
        assert_eq!(first.annotations.get("room"), Some(&Value::from("ops")));

        let second = &results[1].record;
        assert_eq!(second.message_id, "m2");
        assert_eq!(second.author_id, "");
        assert_eq!(second.annotations.get("room"), Some(&Value::from("ops")));
    }

    #[test]
    fn test_search_rejects_bad_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());

        assert_eq!(
            store.search("server", 0).err().map(|e| e.kind()),
            Some(StoreErrorKind::InvalidArgument)
        );
        assert_eq!(
            store.search("   ", 3).err().map(|e| e.kind()),
            Some(StoreErrorKind::InvalidArgument)
        );
    }

    #[test]
    fn test_ingest_rejects_empty_conversation_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());

        let result = store.ingest("", &[Message::new("hello")], None);
        assert_eq!(result.err().map(|e| e.kind()), Some(StoreErrorKind::InvalidArgument));
    }

    #[test]
    fn test_wrong_dimension_embedding_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = SemanticStore::open(
            dir.path(),
            4,
            Box::new(FaultyEmbedder::new(4, Fault::WrongDimension(3))),
        )
        .unwrap();

        let result = store.ingest(
            "c1",
            &[Message::new("one"), Message::new("two")],
            None,
        );

        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch { expected: 4, got: 3 })
        ));
        assert_eq!(store.table_sizes(), (0, 0));
        assert!(!dir.path().join("vectors.bin").exists());
    }

    #[test]
    fn test_embedder_failure_is_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            SemanticStore::open(dir.path(), 4, Box::new(FaultyEmbedder::new(4, Fault::Error)))
                .unwrap();

        let result = store.ingest("c1", &[Message::new("one")], None);
        assert_eq!(result.err().map(|e| e.kind()), Some(StoreErrorKind::EmbeddingFailure));
        assert_eq!(store.table_sizes(), (0, 0));
    }

    #[test]
    fn test_nan_embedding_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SemanticStore::open(
            dir.path(),
            4,
            Box::new(FaultyEmbedder::new(4, Fault::NotANumber)),
        )
        .unwrap();

        let result = store.ingest("c1", &[Message::new("one")], None);
        assert_eq!(result.err().map(|e| e.kind()), Some(StoreErrorKind::EmbeddingFailure));
        assert_eq!(store.table_sizes(), (0, 0));
        assert!(!dir.path().join("vectors.bin").exists());
    }

    #[test]
    fn test_missing_vectors_are_an_embedding_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = SemanticStore::open(
            dir.path(),
            4,
            Box::new(FaultyEmbedder::new(4, Fault::DropLast)),
        )
        .unwrap();

        let result = store.ingest("c1", &[Message::new("one"), Message::new("two")], None);
        assert!(matches!(
            result,
            Err(StoreError::EmbeddingFailure(EmbeddingError::CountMismatch {
                expected: 2,
                got: 1
            }))
        ));
        assert_eq!(store.table_sizes(), (0, 0));
    }

    #[test]
    fn test_failed_flush_rolls_back_the_append() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("store");
        let store = open(&store_dir);

        store
            .ingest("c1", &[Message::new("the server is down")], None)
            .unwrap();

        std::fs::remove_dir_all(&store_dir).unwrap();

        let result = store.ingest("c2", &[Message::new("thanks for the help")], None);
        assert_eq!(result.err().map(|e| e.kind()), Some(StoreErrorKind::Persistence));
        assert_eq!(store.table_sizes(), (1, 1));
        assert_eq!(store.stats().unwrap().distinct_conversations, 1);
    }

    #[test]
    fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());

        store
            .ingest("c1", &[Message::new("the server is down"), Message::new("help")], None)
            .unwrap();
        store.ingest("c2", &[Message::new("thanks")], None).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(
            stats,
            StoreStats {
                total_vectors: 3,
                dimension: VOCABULARY.len(),
                distinct_conversations: 2,
            }
        );
    }

    #[test]
    fn test_scored_record_json_shape() {
        let scored = ScoredRecord {
            record: Record {
                conversation_id: "c1".to_string(),
                message_id: "m1".to_string(),
                body: "the server is down".to_string(),
                author_id: String::new(),
                timestamp: None,
                annotations: Map::new(),
            },
            distance: 4.0,
            similarity: 0.2,
        };

        let json = serde_json::to_value(&scored).unwrap();
        assert_eq!(json["message_id"], "m1");
        assert_eq!(json["distance"], 4.0);
        assert_eq!(json["similarity"], 0.2);
    }
}
