//! Data models for Précis sync

mod document;
mod item;
mod session;

pub use document::{
    DocumentKind, HistoryDocument, LibraryDocument, LocalSettings, SettingsDocument,
    DOCUMENT_VERSION,
};
pub use item::{to_item_map, ItemKind, ItemMap, SyncedItem};
pub use session::{AutoSync, SyncPreferences, SyncSession, UserProfile};
