//! Remote document wire formats

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::item::ItemMap;

/// Current remote schema version.
pub const DOCUMENT_VERSION: u32 = 1;

/// The three named documents kept in the user's remote namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Settings,
    History,
    Library,
}

impl DocumentKind {
    pub const ALL: [Self; 3] = [Self::Settings, Self::History, Self::Library];

    /// Remote file name of the document.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Settings => "precis-settings.json",
            Self::History => "precis-history.json",
            Self::Library => "precis-library.json",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Settings => "settings",
            Self::History => "history",
            Self::Library => "library",
        })
    }
}

/// `settings` document: a single LWW value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsDocument {
    pub version: u32,
    /// Unix ms
    pub updated_at: i64,
    pub data: Map<String, Value>,
}

/// `history` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryDocument {
    pub version: u32,
    pub updated_at: i64,
    #[serde(default)]
    pub items: ItemMap,
}

/// `library` document: archives plus the tags they reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryDocument {
    pub version: u32,
    pub updated_at: i64,
    #[serde(default)]
    pub archives: ItemMap,
    #[serde(default)]
    pub tags: ItemMap,
}

impl SettingsDocument {
    #[must_use]
    pub const fn new(data: Map<String, Value>, updated_at: i64) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            updated_at,
            data,
        }
    }
}

impl HistoryDocument {
    #[must_use]
    pub const fn new(items: ItemMap, updated_at: i64) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            updated_at,
            items,
        }
    }
}

impl LibraryDocument {
    #[must_use]
    pub const fn new(archives: ItemMap, tags: ItemMap, updated_at: i64) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            updated_at,
            archives,
            tags,
        }
    }
}

/// Locally stored settings as seen by the sync engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSettings {
    pub data: Map<String, Value>,
    /// Unix ms of the last local edit
    pub updated_at: i64,
}

impl LocalSettings {
    #[must_use]
    pub const fn new(data: Map<String, Value>, updated_at: i64) -> Self {
        Self { data, updated_at }
    }

    #[must_use]
    pub fn to_document(&self) -> SettingsDocument {
        SettingsDocument::new(self.data.clone(), self.updated_at)
    }
}

impl From<SettingsDocument> for LocalSettings {
    fn from(document: SettingsDocument) -> Self {
        Self::new(document.data, document.updated_at)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn library_document_wire_shape() {
        let raw = json!({
            "version": 1,
            "updatedAt": 1_700_000_000_000_i64,
            "archives": {
                "a1": {"id": "a1", "updatedAt": "2023-11-14T22:13:20.000Z", "deleted": false, "tags": ["t1"]}
            },
            "tags": {
                "t1": {"id": "t1", "updatedAt": "2023-11-14T22:13:20.000Z", "deleted": false, "name": "rust"}
            }
        });
        let document: LibraryDocument = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(document.archives["a1"].tag_ids(), vec!["t1".to_string()]);
        assert_eq!(serde_json::to_value(&document).unwrap(), raw);
    }

    #[test]
    fn history_document_tolerates_missing_items() {
        let document: HistoryDocument =
            serde_json::from_value(json!({"version": 1, "updatedAt": 5})).unwrap();
        assert!(document.items.is_empty());
    }

    #[test]
    fn settings_round_trip_through_local() {
        let mut data = Map::new();
        data.insert("theme".into(), json!("dark"));
        let local = LocalSettings::new(data, 100);
        let document = local.to_document();
        assert_eq!(document.version, DOCUMENT_VERSION);
        assert_eq!(LocalSettings::from(document), local);
    }

    #[test]
    fn file_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            DocumentKind::ALL.iter().map(|kind| kind.file_name()).collect();
        assert_eq!(names.len(), 3);
    }
}
