//! Sync orchestration.
//!
//! [`SyncService`] owns the cycle: fetch the three remote documents, merge
//! or reconcile each against the local store, write back, push what changed
//! and record the result in the session. At most one cycle runs per process;
//! triggers that arrive meanwhile are coalesced into a single follow-up run.

mod command;
mod outcome;
mod scheduler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Map;
use tokio::task::JoinHandle;

pub use command::{CommandReply, SyncCommand};
pub use outcome::{PushDecision, SyncOutcome, SyncReport, SyncStatus};
pub use scheduler::{NoopScheduler, SyncScheduler};

use crate::auth::TokenManager;
use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::conflict::{
    evaluate_settings, ConflictChoice, ConflictState, PendingSettingsConflict, SettingsDecision,
};
use crate::error::{SyncError, SyncResult};
use crate::merge::{cleanup_soft_deleted, merge_history, merge_library, prune_archive_tags};
use crate::models::{
    AutoSync, DocumentKind, HistoryDocument, ItemKind, LibraryDocument, LocalSettings,
    SettingsDocument, SyncPreferences, SyncSession, SyncedItem, UserProfile,
};
use crate::remote::RemoteDocumentStore;
use crate::session::SessionState;
use crate::store::LocalStore;

/// Collaborators injected into a [`SyncService`].
pub struct SyncComponents {
    pub clock: Arc<dyn Clock>,
    pub session: Arc<SessionState>,
    pub tokens: Arc<TokenManager>,
    pub remote: Arc<dyn RemoteDocumentStore>,
    pub local: Arc<dyn LocalStore>,
    pub scheduler: Arc<dyn SyncScheduler>,
}

struct ServiceInner {
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    session: Arc<SessionState>,
    tokens: Arc<TokenManager>,
    remote: Arc<dyn RemoteDocumentStore>,
    local: Arc<dyn LocalStore>,
    scheduler: Arc<dyn SyncScheduler>,
    syncing: AtomicBool,
    pending_sync: AtomicBool,
    debounce: Mutex<Option<JoinHandle<()>>>,
    conflict: Mutex<ConflictState>,
}

/// Cross-device sync orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<ServiceInner>,
}

/// Clears the single-flight flag however the cycle ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Remote documents fetched at the start of a cycle.
struct Fetched {
    settings: Option<SettingsDocument>,
    history: Option<HistoryDocument>,
    library: Option<LibraryDocument>,
}

impl SyncService {
    pub fn new(config: SyncConfig, components: SyncComponents) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                config,
                clock: components.clock,
                session: components.session,
                tokens: components.tokens,
                remote: components.remote,
                local: components.local,
                scheduler: components.scheduler,
                syncing: AtomicBool::new(false),
                pending_sync: AtomicBool::new(false),
                debounce: Mutex::new(None),
                conflict: Mutex::new(ConflictState::None),
            }),
        }
    }

    /// Whether a cycle is in flight.
    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> SyncSession {
        self.inner.session.snapshot()
    }

    /// Run one sync cycle.
    ///
    /// A caller that finds a cycle in flight gets `AlreadyRunning` and a
    /// follow-up cycle is queued. An expired access token is refreshed and
    /// the cycle retried once.
    pub async fn pull(&self) -> SyncResult<SyncOutcome> {
        let inner = &self.inner;
        if inner
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            inner.pending_sync.store(true, Ordering::SeqCst);
            tracing::debug!("Sync already running; queued a follow-up cycle");
            return Ok(SyncOutcome::AlreadyRunning);
        }

        let result = {
            let _guard = FlightGuard(&inner.syncing);
            self.run_cycle_with_retry().await
        };

        if inner.pending_sync.swap(false, Ordering::SeqCst) {
            tracing::debug!("Scheduling coalesced follow-up cycle");
            self.arm_debounce();
        }
        result
    }

    /// Request a background cycle after the debounce delay. Never fails.
    ///
    /// No-op unless logged in with auto-sync not turned off. Repeated calls
    /// within the delay restart the timer; calls during a running cycle are
    /// folded into one follow-up cycle.
    pub fn trigger_sync(&self) {
        if !self.inner.session.snapshot().background_sync_allowed() {
            tracing::trace!("Background sync not allowed; ignoring trigger");
            return;
        }
        if self.is_syncing() {
            self.inner.pending_sync.store(true, Ordering::SeqCst);
            // The cycle may have finished before the flag was seen.
            if self.is_syncing() || !self.inner.pending_sync.swap(false, Ordering::SeqCst) {
                return;
            }
        }
        self.arm_debounce();
    }

    /// Run a background cycle now (periodic scheduler tick).
    ///
    /// Failures are logged and recorded for the status indicator.
    pub async fn background_sync(&self) {
        if !self.inner.session.snapshot().background_sync_allowed() {
            return;
        }
        match self.pull().await {
            Ok(outcome) => tracing::debug!(?outcome, "Background sync finished"),
            Err(error) => {
                tracing::warn!("Background sync failed: {}", error);
                let message = error.to_string();
                if let Err(store_error) = self.inner.session.update(|session| {
                    session.last_sync_error = Some(message);
                }) {
                    tracing::error!("Failed to record sync error: {}", store_error);
                }
            }
        }
    }

    /// Interactive login. The first cycle is queued, not awaited.
    pub async fn login(&self) -> SyncResult<Option<UserProfile>> {
        let grant = self.inner.tokens.authenticate().await?;
        self.inner.session.update(|session| {
            session.is_logged_in = true;
            session.access_token = Some(grant.access_token.clone());
            session.refresh_token = Some(grant.refresh_token.clone());
            session.token_expiry = grant.expires_at;
            session.last_sync_error = None;
        })?;
        tracing::info!("Logged in");

        let profile = match self.inner.tokens.fetch_profile().await {
            Ok(profile) => {
                self.inner.session.update(|session| {
                    session.user_profile = Some(profile.clone());
                })?;
                Some(profile)
            }
            Err(error) => {
                tracing::warn!("Failed to load user profile: {}", error);
                None
            }
        };

        self.reconcile_schedule();
        self.trigger_sync();
        Ok(profile)
    }

    /// Drop credentials and stop background work.
    ///
    /// With `revoke`, the grant is revoked at the provider first (best effort).
    /// A cycle in flight is not interrupted; its remaining steps fail for lack
    /// of credentials.
    pub async fn logout(&self, revoke: bool) -> SyncResult<()> {
        if revoke {
            self.inner.tokens.revoke().await;
        }
        self.cancel_debounce();
        self.inner.pending_sync.store(false, Ordering::SeqCst);
        self.inner.tokens.invalidate();
        self.inner.session.update(SyncSession::clear_credentials)?;
        *self.conflict() = ConflictState::None;
        self.reconcile_schedule();
        tracing::info!("Logged out");
        Ok(())
    }

    /// Foreground cycle; errors propagate to the caller.
    pub async fn sync_now(&self) -> SyncResult<SyncOutcome> {
        if !self.inner.session.snapshot().is_logged_in {
            return Err(SyncError::NotLoggedIn);
        }
        self.cancel_debounce();
        self.pull().await
    }

    pub fn set_auto_sync(&self, enabled: bool) -> SyncResult<AutoSync> {
        let auto_sync = AutoSync::from(enabled);
        self.inner.session.update(|session| {
            session.auto_sync_enabled = auto_sync;
        })?;
        if enabled {
            self.trigger_sync();
        } else {
            self.cancel_debounce();
        }
        self.reconcile_schedule();
        Ok(auto_sync)
    }

    /// Turning settings sync off drops any pending settings conflict; the
    /// first-sync check runs again once it is turned back on.
    pub fn set_sync_preferences(&self, preferences: SyncPreferences) -> SyncResult<()> {
        self.inner.session.update(|session| {
            session.sync_preferences = preferences;
        })?;
        if !preferences.settings {
            let mut conflict = self.conflict();
            if conflict.is_pending() {
                tracing::info!("Settings sync disabled; dropping pending conflict");
                *conflict = ConflictState::None;
            }
        }
        Ok(())
    }

    /// Apply the user's answer to a pending settings conflict.
    pub async fn resolve_settings_conflict(
        &self,
        choice: ConflictChoice,
    ) -> SyncResult<ConflictState> {
        let pending = self
            .conflict()
            .pending()
            .cloned()
            .ok_or(SyncError::NoPendingConflict)?;
        if !self.inner.session.snapshot().sync_preferences.settings {
            return Err(SyncError::InvalidConfiguration(
                "Settings sync is disabled".to_string(),
            ));
        }

        match choice {
            ConflictChoice::Local => {
                let now = self.inner.clock.now_ms();
                let current = self.inner.local.load_settings()?;
                let settings = LocalSettings::new(current.data, now);
                self.push_with_retry(DocumentKind::Settings, &settings.to_document())
                    .await?;
                self.inner.local.apply_settings(&settings)?;
                self.finish_resolution(now)?;
            }
            ConflictChoice::Cloud => {
                self.inner.local.apply_settings(&pending.cloud())?;
                self.finish_resolution(self.inner.clock.now_ms())?;
            }
            ConflictChoice::Cancel => {
                self.inner.session.update(|session| {
                    session.auto_sync_enabled = AutoSync::Disabled;
                })?;
                self.cancel_debounce();
                self.reconcile_schedule();
            }
        }

        let state = ConflictState::after(choice);
        *self.conflict() = state.clone();
        tracing::info!(?choice, "Settings conflict resolved");
        Ok(state)
    }

    pub fn status(&self) -> SyncStatus {
        let session = self.inner.session.snapshot();
        SyncStatus {
            is_logged_in: session.is_logged_in,
            auto_sync: session.auto_sync_enabled,
            is_syncing: self.is_syncing(),
            last_sync_time: session.last_sync_time,
            last_sync_error: session.last_sync_error,
            conflict_pending: self.conflict().is_pending(),
            user_profile: session.user_profile,
            preferences: session.sync_preferences,
            device_id: session.device_id,
        }
    }

    pub fn pending_conflict(&self) -> Option<PendingSettingsConflict> {
        self.conflict().pending().cloned()
    }

    /// Align the periodic scheduler with the session.
    pub fn reconcile_schedule(&self) {
        if self.inner.session.snapshot().background_sync_allowed() {
            self.inner
                .scheduler
                .schedule(self.inner.config.periodic_interval);
        } else {
            self.inner.scheduler.unschedule();
        }
    }

    /// Record a local edit of a replicated item and queue a sync.
    pub fn record_item(&self, kind: ItemKind, mut item: SyncedItem) -> SyncResult<SyncedItem> {
        item.touch(self.inner.clock.now_ms());
        self.inner.local.upsert(kind, &item)?;
        self.trigger_sync();
        Ok(item)
    }

    /// Tombstone a local item and queue a sync.
    pub fn delete_item(&self, kind: ItemKind, id: &str) -> SyncResult<bool> {
        let deleted = self
            .inner
            .local
            .soft_delete(kind, id, self.inner.clock.now_ms())?;
        if deleted {
            self.trigger_sync();
        }
        Ok(deleted)
    }

    /// Record a local settings edit and queue a sync.
    pub fn update_settings(&self, data: Map<String, serde_json::Value>) -> SyncResult<()> {
        let settings = LocalSettings::new(data, self.inner.clock.now_ms());
        self.inner.local.apply_settings(&settings)?;
        self.trigger_sync();
        Ok(())
    }

    fn conflict(&self) -> MutexGuard<'_, ConflictState> {
        self.inner
            .conflict
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_resolution(&self, now: i64) -> SyncResult<()> {
        self.inner.session.update(|session| {
            session.needs_settings_conflict_check = false;
            session.last_sync_time = Some(now);
            session.last_sync_error = None;
        })?;
        Ok(())
    }

    fn arm_debounce(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime available; dropping sync trigger");
            return;
        };
        let service = self.clone();
        let delay = self.inner.config.debounce;
        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach the cycle so re-arming only ever cancels a sleeping timer.
            tokio::spawn(async move { service.background_sync().await });
        });

        let previous = self
            .inner
            .debounce
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel_debounce(&self) {
        let timer = self
            .inner
            .debounce
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    async fn run_cycle_with_retry(&self) -> SyncResult<SyncOutcome> {
        match self.run_cycle().await {
            Err(SyncError::TokenExpired) => {
                tracing::info!(retry = true, "Access token rejected; refreshing");
                self.inner.tokens.invalidate();
                self.inner.tokens.refresh().await?;
                self.run_cycle().await.map_err(expired_after_retry)
            }
            other => other,
        }
    }

    async fn run_cycle(&self) -> SyncResult<SyncOutcome> {
        let session = self.inner.session.snapshot();
        if !session.is_logged_in {
            return Err(SyncError::NotLoggedIn);
        }
        let preferences = session.sync_preferences;
        let token = self.inner.tokens.get_valid_access_token().await?;

        let fetched = self.fetch_all(&token, preferences).await?;
        if fetched.settings.is_none() && fetched.history.is_none() && fetched.library.is_none() {
            tracing::info!("No remote documents found; bootstrapping from local data");
        }

        let now = self.inner.clock.now_ms();
        let report = SyncReport {
            settings: if preferences.settings {
                self.sync_settings(&token, fetched.settings, &session)
                    .await?
            } else {
                PushDecision::Disabled
            },
            history: if preferences.history {
                self.sync_history(&token, fetched.history, now).await?
            } else {
                PushDecision::Disabled
            },
            library: if preferences.library {
                self.sync_library(&token, fetched.library, now).await?
            } else {
                PushDecision::Disabled
            },
        };

        if let (PushDecision::ConflictPending, Some(conflict)) =
            (report.settings, self.pending_conflict())
        {
            tracing::info!(?report, "Sync finished with a pending settings conflict");
            return Ok(SyncOutcome::ConflictPending { report, conflict });
        }

        self.inner.session.update(|session| {
            if session.is_logged_in {
                session.last_sync_time = Some(now);
                session.last_sync_error = None;
            }
        })?;
        tracing::info!(pushes = report.pushes(), "Sync completed");
        Ok(SyncOutcome::Completed {
            report,
            finished_at: now,
        })
    }

    async fn fetch_all(&self, token: &str, preferences: SyncPreferences) -> SyncResult<Fetched> {
        let (settings, history, library) = tokio::join!(
            self.fetch::<SettingsDocument>(token, DocumentKind::Settings, preferences.settings),
            self.fetch::<HistoryDocument>(token, DocumentKind::History, preferences.history),
            self.fetch::<LibraryDocument>(token, DocumentKind::Library, preferences.library),
        );
        Ok(Fetched {
            settings: settings?,
            history: history?,
            library: library?,
        })
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        token: &str,
        kind: DocumentKind,
        enabled: bool,
    ) -> SyncResult<Option<T>> {
        if !enabled {
            return Ok(None);
        }
        let Some(content) = self.inner.remote.get(token, kind.file_name()).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(content)?))
    }

    async fn push<T: Serialize + Sync>(
        &self,
        token: &str,
        kind: DocumentKind,
        document: &T,
    ) -> SyncResult<()> {
        let content = serde_json::to_value(document)?;
        self.inner
            .remote
            .save(token, kind.file_name(), &content)
            .await?;
        tracing::debug!(document = %kind, "Pushed remote document");
        Ok(())
    }

    /// Push outside a cycle, refreshing the token once if it was rejected.
    async fn push_with_retry<T: Serialize + Sync>(
        &self,
        kind: DocumentKind,
        document: &T,
    ) -> SyncResult<()> {
        let token = self.inner.tokens.get_valid_access_token().await?;
        match self.push(&token, kind, document).await {
            Err(SyncError::TokenExpired) => {
                self.inner.tokens.invalidate();
                let token = self.inner.tokens.refresh().await?;
                self.push(&token, kind, document)
                    .await
                    .map_err(expired_after_retry)
            }
            other => other,
        }
    }

    async fn sync_settings(
        &self,
        token: &str,
        cloud: Option<SettingsDocument>,
        session: &SyncSession,
    ) -> SyncResult<PushDecision> {
        let local = self.inner.local.load_settings()?;
        let Some(cloud) = cloud else {
            self.push(token, DocumentKind::Settings, &local.to_document())
                .await?;
            self.settings_check_done()?;
            return Ok(PushDecision::Bootstrapped);
        };

        match evaluate_settings(&local, &cloud, session.needs_settings_conflict_check) {
            SettingsDecision::InSync => {
                self.settings_check_done()?;
                Ok(PushDecision::InSync)
            }
            SettingsDecision::PushLocal => {
                self.push(token, DocumentKind::Settings, &local.to_document())
                    .await?;
                Ok(PushDecision::Pushed)
            }
            SettingsDecision::ApplyCloud => {
                self.inner.local.apply_settings(&LocalSettings::from(cloud))?;
                tracing::debug!("Applied newer cloud settings");
                Ok(PushDecision::AppliedCloud)
            }
            SettingsDecision::Conflict(conflict) => {
                tracing::info!(
                    local_timestamp = conflict.local_timestamp,
                    cloud_timestamp = conflict.cloud_timestamp,
                    "Settings differ on first sync; waiting for the user"
                );
                *self.conflict() = ConflictState::Pending(conflict);
                Ok(PushDecision::ConflictPending)
            }
        }
    }

    /// The first settings reconcile after login finished without a conflict.
    fn settings_check_done(&self) -> SyncResult<()> {
        self.inner.session.update(|session| {
            session.needs_settings_conflict_check = false;
        })?;
        let mut conflict = self.conflict();
        if conflict.is_pending() {
            *conflict = ConflictState::None;
        }
        Ok(())
    }

    async fn sync_history(
        &self,
        token: &str,
        cloud: Option<HistoryDocument>,
        now: i64,
    ) -> SyncResult<PushDecision> {
        let retention = self.inner.config.tombstone_retention_ms();
        let local = self.inner.local.get_all(ItemKind::History)?;

        let Some(cloud) = cloud else {
            let items = cleanup_soft_deleted(local.clone(), now, retention);
            if items != local {
                self.inner.local.replace_all(ItemKind::History, &items)?;
            }
            self.push(token, DocumentKind::History, &HistoryDocument::new(items, now))
                .await?;
            return Ok(PushDecision::Bootstrapped);
        };

        let merged = merge_history(&cloud.items, &local, now, retention);
        if merged.items != local {
            self.inner.local.replace_all(ItemKind::History, &merged.items)?;
        }
        tracing::debug!(kind = %ItemKind::History, items = merged.items.len(), "Merged items");

        if merged.changed {
            self.push(
                token,
                DocumentKind::History,
                &HistoryDocument::new(merged.items, now),
            )
            .await?;
            Ok(PushDecision::Pushed)
        } else {
            tracing::debug!(document = %DocumentKind::History, "Remote copy current; skipping write");
            Ok(PushDecision::StaleWriteSkipped)
        }
    }

    async fn sync_library(
        &self,
        token: &str,
        cloud: Option<LibraryDocument>,
        now: i64,
    ) -> SyncResult<PushDecision> {
        let retention = self.inner.config.tombstone_retention_ms();
        let local_archives = self.inner.local.get_all(ItemKind::Archive)?;
        let local_tags = self.inner.local.get_all(ItemKind::Tag)?;

        let (archives, tags, decision) = if let Some(cloud) = cloud {
            let merged = merge_library(
                &cloud.archives,
                &cloud.tags,
                &local_archives,
                &local_tags,
                now,
                retention,
            );
            let decision = if merged.changed {
                PushDecision::Pushed
            } else {
                PushDecision::StaleWriteSkipped
            };
            (merged.archives, merged.tags, decision)
        } else {
            let tags = cleanup_soft_deleted(local_tags.clone(), now, retention);
            let mut archives = cleanup_soft_deleted(local_archives.clone(), now, retention);
            prune_archive_tags(&mut archives, &tags);
            (archives, tags, PushDecision::Bootstrapped)
        };

        if archives != local_archives {
            self.inner.local.replace_all(ItemKind::Archive, &archives)?;
        }
        if tags != local_tags {
            self.inner.local.replace_all(ItemKind::Tag, &tags)?;
        }
        tracing::debug!(
            kind = %ItemKind::Archive,
            items = archives.len(),
            tags = tags.len(),
            "Merged library"
        );

        if decision == PushDecision::StaleWriteSkipped {
            tracing::debug!(document = %DocumentKind::Library, "Remote copy current; skipping write");
        } else {
            self.push(
                token,
                DocumentKind::Library,
                &LibraryDocument::new(archives, tags, now),
            )
            .await?;
        }
        Ok(decision)
    }
}

/// A token rejected again right after a refresh is treated as transient.
fn expired_after_retry(error: SyncError) -> SyncError {
    match error {
        SyncError::TokenExpired => SyncError::Network(
            "Remote store rejected a freshly refreshed access token".to_string(),
        ),
        other => other,
    }
}
