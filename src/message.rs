//! Chat messages as they arrive from the chat backend.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Message timestamp, kept exactly as the caller sent it.
///
/// Matrix events carry epoch millis, other sources send ISO-8601 strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Millis(i64),
    Float(f64),
    Text(String),
}

/// A single chat message.
///
/// Fields the store does not know about are kept in `extra` so that
/// ranking can hand the message back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub body: String,

    #[serde(default, alias = "author_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_server_ts: Option<Timestamp>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// `timestamp`, falling back to the Matrix `origin_server_ts`.
    pub fn effective_timestamp(&self) -> Option<&Timestamp> {
        self.timestamp.as_ref().or(self.origin_server_ts.as_ref())
    }
}

/// `"body": null` reads as an empty body, which ingest and ranking skip.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
