use std::path::Path;
use std::sync::Arc;

use precis_core::conflict::{ConflictChoice, ConflictState};
use precis_core::models::SyncPreferences;
use precis_core::sync::{CommandReply, NoopScheduler};
use precis_core::{SyncCommand, SyncError, SyncOutcome};

use crate::cli::{ResolveChoice, Toggle};
use crate::commands::account::print_outcome;
use crate::commands::common::{format_conflict_lines, open_service};
use crate::error::CliError;

pub async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path, Arc::new(NoopScheduler))?;
    if let CommandReply::Synced(outcome) = service.handle(SyncCommand::SyncNow).await? {
        print_outcome(&outcome);
    }
    Ok(())
}

/// The conflict lives in the service's memory, so a fresh process re-runs a
/// cycle to rediscover it before applying the choice.
pub async fn run_resolve(choice: ResolveChoice, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path, Arc::new(NoopScheduler))?;

    if service.pending_conflict().is_none() {
        match service.sync_now().await? {
            SyncOutcome::ConflictPending { conflict, .. } => {
                for line in format_conflict_lines(&conflict).into_iter().take(3) {
                    println!("{line}");
                }
            }
            _ => return Err(SyncError::NoPendingConflict.into()),
        }
    }

    let choice = ConflictChoice::from(choice);
    let reply = service
        .handle(SyncCommand::ResolveConflict { choice })
        .await?;
    if let CommandReply::ConflictResolved(state) = reply {
        println!("{}", resolution_message(&state));
    }
    Ok(())
}

const fn resolution_message(state: &ConflictState) -> &'static str {
    match state {
        ConflictState::ResolvedLocal => "Kept this device's settings and uploaded them",
        ConflictState::ResolvedCloud => "Applied the settings stored in the cloud",
        ConflictState::Cancelled => "Left settings unresolved; auto-sync is now off",
        ConflictState::None | ConflictState::Pending(_) => "Settings conflict still pending",
    }
}

pub async fn run_auto_sync(state: Toggle, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path, Arc::new(NoopScheduler))?;
    service
        .handle(SyncCommand::SetAutoSync {
            enabled: state.enabled(),
        })
        .await?;
    println!(
        "Auto-sync {}",
        if state.enabled() { "enabled" } else { "disabled" }
    );
    Ok(())
}

pub async fn run_prefs(
    settings: Option<bool>,
    history: Option<bool>,
    library: Option<bool>,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path, Arc::new(NoopScheduler))?;
    let current = service.session().sync_preferences;
    let preferences = apply_preference_flags(current, settings, history, library);

    if preferences != current {
        service
            .handle(SyncCommand::SetPreferences { preferences })
            .await?;
    }

    println!("settings: {}", preferences.settings);
    println!("history:  {}", preferences.history);
    println!("library:  {}", preferences.library);
    Ok(())
}

pub const fn apply_preference_flags(
    current: SyncPreferences,
    settings: Option<bool>,
    history: Option<bool>,
    library: Option<bool>,
) -> SyncPreferences {
    SyncPreferences {
        settings: match settings {
            Some(value) => value,
            None => current.settings,
        },
        history: match history {
            Some(value) => value,
            None => current.history,
        },
        library: match library {
            Some(value) => value,
            None => current.library,
        },
    }
}
