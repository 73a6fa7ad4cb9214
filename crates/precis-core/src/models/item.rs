//! Replicated record model

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Map of replicated records keyed by id.
pub type ItemMap = BTreeMap<String, SyncedItem>;

/// Kinds of records kept in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Visited-page history entries
    History,
    /// Saved summaries (library archive)
    Archive,
    /// Library tags referenced by archives
    Tag,
}

impl ItemKind {
    pub const ALL: [Self; 3] = [Self::History, Self::Archive, Self::Tag];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Archive => "archive",
            Self::Tag => "tag",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base shape of every replicated record.
///
/// Fields other than `id`, `updatedAt` and `deleted` are carried verbatim so
/// the sync engine never has to understand record payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedItem {
    /// Stable, device-independent identifier
    pub id: String,
    /// Logical clock used for conflict resolution
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    /// Tombstone marker
    #[serde(default)]
    pub deleted: bool,
    /// Record payload
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SyncedItem {
    /// Create a live record with the given id and timestamp (Unix ms).
    #[must_use]
    pub fn new(id: impl Into<String>, updated_at_ms: i64) -> Self {
        Self {
            id: id.into(),
            updated_at: from_millis(updated_at_ms),
            deleted: false,
            fields: Map::new(),
        }
    }

    /// Create a record with a fresh UUID v7 id.
    #[must_use]
    pub fn with_new_id(updated_at_ms: i64) -> Self {
        Self::new(Uuid::now_v7().to_string(), updated_at_ms)
    }

    /// Builder-style payload field setter.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn updated_at_ms(&self) -> i64 {
        self.updated_at.timestamp_millis()
    }

    /// Bump the logical clock after an edit.
    pub fn touch(&mut self, now_ms: i64) {
        self.updated_at = from_millis(now_ms);
    }

    /// Turn the record into a tombstone.
    pub fn mark_deleted(&mut self, now_ms: i64) {
        self.deleted = true;
        self.touch(now_ms);
    }

    /// Tag ids referenced by an archive record.
    #[must_use]
    pub fn tag_ids(&self) -> Vec<String> {
        self.fields
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Keep only the tag references accepted by `keep`.
    ///
    /// Returns `true` when at least one reference was dropped.
    pub fn retain_tags(&mut self, mut keep: impl FnMut(&str) -> bool) -> bool {
        let Some(Value::Array(tags)) = self.fields.get_mut("tags") else {
            return false;
        };
        let before = tags.len();
        tags.retain(|tag| tag.as_str().is_some_and(&mut keep));
        tags.len() != before
    }
}

/// Build an `ItemMap` from a list of records. Later duplicates win.
pub fn to_item_map(items: impl IntoIterator<Item = SyncedItem>) -> ItemMap {
    items
        .into_iter()
        .map(|item| (item.id.clone(), item))
        .collect()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// RFC 3339 on the way out; RFC 3339 or integer Unix ms on the way in.
mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {ms}"))),
            RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                .map(|value| value.with_timezone(&Utc))
                .map_err(|error| de::Error::custom(format!("invalid timestamp '{text}': {error}"))),
        }
    }
}
