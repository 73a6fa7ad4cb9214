//! Closed command set accepted from UI surfaces.

use serde::{Deserialize, Serialize};

use super::{SyncOutcome, SyncService, SyncStatus};
use crate::conflict::{ConflictChoice, ConflictState};
use crate::error::SyncResult;
use crate::models::{AutoSync, SyncPreferences, UserProfile};

/// A request from a UI surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncCommand {
    Login,
    Logout {
        #[serde(default)]
        revoke: bool,
    },
    SyncNow,
    SetAutoSync {
        enabled: bool,
    },
    SetPreferences {
        preferences: SyncPreferences,
    },
    ResolveConflict {
        choice: ConflictChoice,
    },
    TriggerSync,
    Status,
}

/// Reply to a [`SyncCommand`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    LoggedIn(Option<UserProfile>),
    LoggedOut,
    Synced(SyncOutcome),
    AutoSyncUpdated(AutoSync),
    PreferencesUpdated(SyncPreferences),
    ConflictResolved(ConflictState),
    Triggered,
    Status(SyncStatus),
}

impl SyncService {
    /// Dispatch a command to the matching entrypoint.
    pub async fn handle(&self, command: SyncCommand) -> SyncResult<CommandReply> {
        tracing::debug!(?command, "Handling sync command");
        match command {
            SyncCommand::Login => self.login().await.map(CommandReply::LoggedIn),
            SyncCommand::Logout { revoke } => {
                self.logout(revoke).await?;
                Ok(CommandReply::LoggedOut)
            }
            SyncCommand::SyncNow => self.sync_now().await.map(CommandReply::Synced),
            SyncCommand::SetAutoSync { enabled } => {
                self.set_auto_sync(enabled).map(CommandReply::AutoSyncUpdated)
            }
            SyncCommand::SetPreferences { preferences } => {
                self.set_sync_preferences(preferences)?;
                Ok(CommandReply::PreferencesUpdated(preferences))
            }
            SyncCommand::ResolveConflict { choice } => self
                .resolve_settings_conflict(choice)
                .await
                .map(CommandReply::ConflictResolved),
            SyncCommand::TriggerSync => {
                self.trigger_sync();
                Ok(CommandReply::Triggered)
            }
            SyncCommand::Status => Ok(CommandReply::Status(self.status())),
        }
    }
}
