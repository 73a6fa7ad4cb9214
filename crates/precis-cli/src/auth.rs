//! Sync session persistence in the OS keychain.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;

use precis_core::session::SessionPersistence;
use precis_core::{SyncError, SyncResult, SyncSession};

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "precis-cli";

/// Stores the serialized [`SyncSession`] (tokens included) under one
/// keychain entry per data directory.
#[derive(Clone)]
pub struct KeyringSessionStore {
    username: String,
}

impl KeyringSessionStore {
    pub fn new(scope: &str) -> Self {
        Self {
            username: format!("sync_session:{scope}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> SyncResult<Entry> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username).map_err(secure_storage)
    }
}

impl SessionPersistence for KeyringSessionStore {
    #[cfg(not(test))]
    fn load_session(&self) -> SyncResult<Option<SyncSession>> {
        match self.entry()?.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(secure_storage(error)),
        }
    }

    #[cfg(test)]
    fn load_session(&self) -> SyncResult<Option<SyncSession>> {
        let guard = Self::test_store().lock().map_err(secure_storage)?;
        guard
            .get(&self.username)
            .map(|raw| serde_json::from_str(raw))
            .transpose()
            .map_err(SyncError::from)
    }

    #[cfg(not(test))]
    fn save_session(&self, session: &SyncSession) -> SyncResult<()> {
        let raw = serde_json::to_string(session)?;
        self.entry()?.set_password(&raw).map_err(secure_storage)
    }

    #[cfg(test)]
    fn save_session(&self, session: &SyncSession) -> SyncResult<()> {
        let raw = serde_json::to_string(session)?;
        Self::test_store()
            .lock()
            .map_err(secure_storage)?
            .insert(self.username.clone(), raw);
        Ok(())
    }
}

fn secure_storage(error: impl std::fmt::Display) -> SyncError {
    SyncError::Store(format!("Secure storage: {error}"))
}
