//! SQLite-backed local store

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use super::{migrations, LocalStore};
use crate::error::SyncResult;
use crate::models::{ItemKind, ItemMap, LocalSettings, SyncedItem};

const SETTINGS_DATA_KEY: &str = "sync_settings_data";
const SETTINGS_UPDATED_KEY: &str = "sync_settings_updated_at";

/// Local store in a single SQLite file.
///
/// Each item row keeps the full record JSON in `body`; `updated_at` and
/// `deleted` are duplicated into columns for indexing.
pub struct SqliteLocalStore {
    conn: Mutex<Connection>,
}

impl SqliteLocalStore {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "Opened local store");
        Self::with_connection(conn)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> SyncResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> SyncResult<Self> {
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get_setting(conn: &Connection, key: &str) -> SyncResult<Option<String>> {
        Ok(conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn set_setting(conn: &Connection, key: &str, value: &str) -> SyncResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            [key, value],
        )?;
        Ok(())
    }
}

const fn table_name(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::History => "history_items",
        ItemKind::Archive => "archives",
        ItemKind::Tag => "tags",
    }
}

fn write_item(conn: &Connection, kind: ItemKind, item: &SyncedItem) -> SyncResult<()> {
    let body = serde_json::to_string(item)?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (id, updated_at, deleted, body) VALUES (?1, ?2, ?3, ?4)",
            table_name(kind)
        ),
        params![item.id, item.updated_at_ms(), item.deleted, body],
    )?;
    Ok(())
}

fn read_item(conn: &Connection, kind: ItemKind, id: &str) -> SyncResult<Option<SyncedItem>> {
    let body: Option<String> = conn
        .query_row(
            &format!("SELECT body FROM {} WHERE id = ?1", table_name(kind)),
            [id],
            |row| row.get(0),
        )
        .optional()?;
    body.map(|body| serde_json::from_str(&body))
        .transpose()
        .map_err(Into::into)
}

impl LocalStore for SqliteLocalStore {
    fn get_all(&self, kind: ItemKind) -> SyncResult<ItemMap> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT body FROM {} ORDER BY updated_at DESC",
            table_name(kind)
        ))?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut items = ItemMap::new();
        for body in bodies {
            let item: SyncedItem = serde_json::from_str(&body)?;
            items.insert(item.id.clone(), item);
        }
        Ok(items)
    }

    fn replace_all(&self, kind: ItemKind, items: &ItemMap) -> SyncResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {}", table_name(kind)), [])?;
        for item in items.values() {
            write_item(&tx, kind, item)?;
        }
        tx.commit()?;

        tracing::debug!(kind = %kind, items = items.len(), "Replaced local items");
        Ok(())
    }

    fn upsert(&self, kind: ItemKind, item: &SyncedItem) -> SyncResult<()> {
        write_item(&self.conn(), kind, item)
    }

    fn soft_delete(&self, kind: ItemKind, id: &str, now_ms: i64) -> SyncResult<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let Some(mut item) = read_item(&tx, kind, id)? else {
            return Ok(false);
        };
        item.mark_deleted(now_ms);
        write_item(&tx, kind, &item)?;
        tx.commit()?;
        Ok(true)
    }

    fn load_settings(&self) -> SyncResult<LocalSettings> {
        let conn = self.conn();
        let data = match Self::get_setting(&conn, SETTINGS_DATA_KEY)? {
            Some(raw) => serde_json::from_str::<Map<String, Value>>(&raw)?,
            None => Map::new(),
        };
        let updated_at = Self::get_setting(&conn, SETTINGS_UPDATED_KEY)?
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0);
        Ok(LocalSettings::new(data, updated_at))
    }

    fn apply_settings(&self, settings: &LocalSettings) -> SyncResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        Self::set_setting(&tx, SETTINGS_DATA_KEY, &serde_json::to_string(&settings.data)?)?;
        Self::set_setting(&tx, SETTINGS_UPDATED_KEY, &settings.updated_at.to_string())?;
        tx.commit()?;
        Ok(())
    }
}
