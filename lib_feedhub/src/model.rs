//! # Feed Data Model
//!
//! Identifiers and envelopes shared by every stage of the pipeline. Payloads
//! stay opaque (`serde_json::Value` by default); the core only looks at the
//! ordering key of a feed item, its classification and, for entity updates,
//! the integer version number.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a global feed item. Upstream derives it from the creation
/// timestamp, so it is unique and stable across refetches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedId(pub String);

impl FeedId {
    /// Wraps any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrowed view of the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a tracked entity (a single game).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Wraps any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrowed view of the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The routing key of a feed item. Upstream sends it as an integer event
/// type; anything scalar is accepted and normalized to its string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Classification(pub String);

impl Classification {
    /// Wraps any string-like value.
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Classification {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(Self(s)),
            Value::Number(n) => Ok(Self(n.to_string())),
            Value::Bool(b) => Ok(Self(b.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "unsupported classification value: {}",
                other
            ))),
        }
    }
}

/// One item of the global, append-only feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Ordering key.
    pub id: FeedId,
    /// Event type used for typed fan-out.
    #[serde(rename = "type")]
    pub classification: Classification,
    /// Upstream creation time, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// Everything else the upstream sent, untouched.
    #[serde(flatten)]
    pub payload: serde_json::Map<String, Value>,
}

impl FeedItem {
    /// Builds an item with an empty payload.
    pub fn new(id: impl Into<String>, classification: impl Into<String>) -> Self {
        Self {
            id: FeedId::new(id),
            classification: Classification::new(classification),
            created: None,
            payload: serde_json::Map::new(),
        }
    }
}

/// A versioned snapshot of a single entity as returned by the per-entity
/// polling source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate<T = Value> {
    /// Entity the update belongs to.
    pub entity_id: EntityId,
    /// Position of the update within the entity's sequence.
    pub version: u64,
    /// Opaque update body.
    pub payload: T,
}
