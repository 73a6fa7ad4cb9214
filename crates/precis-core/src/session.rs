//! Authoritative owner of the sync session.
//!
//! All reads go through [`SessionState::snapshot`] and all writes through
//! [`SessionState::update`], which persists before returning. Foreground
//! commands, debounce timers and scheduler ticks therefore observe the same
//! state without re-reading persistent storage.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::SyncResult;
use crate::models::SyncSession;

/// Persistence port for the session (keychain, file, memory).
pub trait SessionPersistence: Send + Sync + 'static {
    fn load_session(&self) -> SyncResult<Option<SyncSession>>;
    fn save_session(&self, session: &SyncSession) -> SyncResult<()>;
}

/// In-memory session persistence, mostly for tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    stored: Mutex<Option<SyncSession>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn with_session(session: SyncSession) -> Self {
        Self {
            stored: Mutex::new(Some(session)),
        }
    }

    /// Last persisted value.
    pub fn stored(&self) -> Option<SyncSession> {
        self.stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SessionPersistence for MemorySessionStore {
    fn load_session(&self) -> SyncResult<Option<SyncSession>> {
        Ok(self.stored())
    }

    fn save_session(&self, session: &SyncSession) -> SyncResult<()> {
        *self.stored.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }
}

/// Single owner of the live session.
pub struct SessionState {
    session: RwLock<SyncSession>,
    store: Arc<dyn SessionPersistence>,
}

impl SessionState {
    /// Load the persisted session, creating (and persisting) a fresh one on
    /// first install.
    pub fn load(store: Arc<dyn SessionPersistence>) -> SyncResult<Self> {
        let session = if let Some(session) = store.load_session()? {
            session
        } else {
            let session = SyncSession::default();
            tracing::info!(device_id = %session.device_id, "Created new sync session");
            store.save_session(&session)?;
            session
        };

        Ok(Self {
            session: RwLock::new(session),
            store,
        })
    }

    /// Cheap copy of the current session.
    pub fn snapshot(&self) -> SyncSession {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mutate the session and persist the result.
    ///
    /// The in-memory value is only replaced once persistence succeeded.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut SyncSession) -> R) -> SyncResult<R> {
        let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        let result = mutate(&mut next);
        if next != *guard {
            self.store.save_session(&next)?;
            *guard = next;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_creates_and_persists_fresh_session() {
        let store = Arc::new(MemorySessionStore::default());
        let state = SessionState::load(store.clone()).unwrap();

        let persisted = store.stored().unwrap();
        assert_eq!(persisted.device_id, state.snapshot().device_id);
    }

    #[test]
    fn load_reuses_existing_session() {
        let existing = SyncSession {
            is_logged_in: true,
            ..SyncSession::default()
        };
        let store = Arc::new(MemorySessionStore::with_session(existing.clone()));
        let state = SessionState::load(store).unwrap();
        assert_eq!(state.snapshot(), existing);
    }

    #[test]
    fn update_persists_changes() {
        let store = Arc::new(MemorySessionStore::default());
        let state = SessionState::load(store.clone()).unwrap();

        let previous = state
            .update(|session| {
                let previous = session.last_sync_time;
                session.last_sync_time = Some(42);
                previous
            })
            .unwrap();

        assert_eq!(previous, None);
        assert_eq!(state.snapshot().last_sync_time, Some(42));
        assert_eq!(store.stored().unwrap().last_sync_time, Some(42));
    }
}
