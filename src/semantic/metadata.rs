//! Message records stored alongside the vector index.
//!
//! Record `i` describes the message whose embedding is vector `i`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::message::Timestamp;

/// Everything the store remembers about one embedded message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub conversation_id: String,
    pub message_id: String,
    /// The text that was embedded
    pub body: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    /// Caller-supplied annotations, copied from the ingest call
    #[serde(default)]
    pub annotations: Map<String, Value>,
}

/// Record fields that can be counted with [`MetadataStore::count_distinct`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    ConversationId,
    MessageId,
    AuthorId,
}

impl Record {
    fn field(&self, field: RecordField) -> &str {
        match field {
            RecordField::ConversationId => &self.conversation_id,
            RecordField::MessageId => &self.message_id,
            RecordField::AuthorId => &self.author_id,
        }
    }
}

/// Append-only, ordinal-addressed sequence of records.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    records: Vec<Record>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Append records in order. A record with an empty body rejects the whole batch.
    pub fn append(&mut self, records: Vec<Record>) -> Result<(), MetadataError> {
        if let Some(position) = records.iter().position(|r| r.body.is_empty()) {
            return Err(MetadataError::EmptyBody { position });
        }
        self.records.extend(records);
        Ok(())
    }

    pub fn get(&self, ordinal: usize) -> Result<&Record, MetadataError> {
        self.records
            .get(ordinal)
            .ok_or(MetadataError::IndexOutOfRange {
                ordinal,
                len: self.records.len(),
            })
    }

    pub fn count_distinct(&self, field: RecordField) -> usize {
        self.records
            .iter()
            .map(|r| r.field(field))
            .collect::<HashSet<_>>()
            .len()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Record {position} has an empty body")]
    EmptyBody { position: usize },

    #[error("Ordinal {ordinal} out of range for {len} records")]
    IndexOutOfRange { ordinal: usize, len: usize },
}
