//! Local persistent store port.
//!
//! The sync engine reads and writes local data only through [`LocalStore`].
//! `apply_settings` is the loop-safe write path: it never triggers a sync
//! cycle, so applying cloud settings cannot echo back into another push.

mod migrations;
mod sqlite;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

pub use sqlite::SqliteLocalStore;

use crate::error::SyncResult;
use crate::models::{ItemKind, ItemMap, LocalSettings, SyncedItem};

/// Storage operations needed by the sync engine.
pub trait LocalStore: Send + Sync {
    /// Every stored item of `kind`, tombstones included.
    fn get_all(&self, kind: ItemKind) -> SyncResult<ItemMap>;

    /// Atomically replace all items of `kind`.
    fn replace_all(&self, kind: ItemKind, items: &ItemMap) -> SyncResult<()>;

    /// Insert or overwrite a single item.
    fn upsert(&self, kind: ItemKind, item: &SyncedItem) -> SyncResult<()>;

    /// Turn an item into a tombstone stamped `now_ms`.
    ///
    /// Returns `false` when no such item exists.
    fn soft_delete(&self, kind: ItemKind, id: &str, now_ms: i64) -> SyncResult<bool>;

    /// Current settings; empty with `updated_at == 0` before the first write.
    fn load_settings(&self) -> SyncResult<LocalSettings>;

    /// Overwrite settings without notifying the sync engine.
    fn apply_settings(&self, settings: &LocalSettings) -> SyncResult<()>;
}

/// Store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    items: Mutex<HashMap<ItemKind, ItemMap>>,
    settings: Mutex<LocalSettings>,
}

impl MemoryLocalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_settings(settings: LocalSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            ..Self::default()
        }
    }
}

impl LocalStore for MemoryLocalStore {
    fn get_all(&self, kind: ItemKind) -> SyncResult<ItemMap> {
        Ok(self
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    fn replace_all(&self, kind: ItemKind, items: &ItemMap) -> SyncResult<()> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, items.clone());
        Ok(())
    }

    fn upsert(&self, kind: ItemKind, item: &SyncedItem) -> SyncResult<()> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .insert(item.id.clone(), item.clone());
        Ok(())
    }

    fn soft_delete(&self, kind: ItemKind, id: &str, now_ms: i64) -> SyncResult<bool> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(item) = items.get_mut(&kind).and_then(|map| map.get_mut(id)) else {
            return Ok(false);
        };
        item.mark_deleted(now_ms);
        Ok(true)
    }

    fn load_settings(&self) -> SyncResult<LocalSettings> {
        Ok(self
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn apply_settings(&self, settings: &LocalSettings) -> SyncResult<()> {
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        Ok(())
    }
}
