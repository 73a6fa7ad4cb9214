use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use precis_core::clock::Clock;
use precis_core::conflict::PendingSettingsConflict;
use precis_core::models::AutoSync;
use precis_core::sync::{PushDecision, SyncScheduler, SyncStatus};
use precis_core::{
    DriveDocumentStore, HttpOAuthClient, SessionState, SqliteLocalStore, SyncComponents,
    SyncConfig, SyncOutcome, SyncService, SystemClock, TokenManager,
};

use crate::auth::KeyringSessionStore;
use crate::error::CliError;
use crate::prompt::LoopbackPrompt;

/// Wire the production adapters into a [`SyncService`].
pub fn open_service(
    db_path: &Path,
    scheduler: Arc<dyn SyncScheduler>,
) -> Result<SyncService, CliError> {
    let config = SyncConfig::from_env()?.ok_or(CliError::SyncNotConfigured)?;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let local = Arc::new(SqliteLocalStore::open(db_path)?);

    let persistence = Arc::new(KeyringSessionStore::new(&db_path.display().to_string()));
    let session = Arc::new(SessionState::load(persistence)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let tokens = Arc::new(TokenManager::new(
        config.clone(),
        Arc::new(HttpOAuthClient::new(&config)?),
        Arc::new(LoopbackPrompt::new(&config.redirect_uri)?),
        Arc::clone(&session),
        Arc::clone(&clock),
    ));
    let remote = Arc::new(DriveDocumentStore::new(&config)?);

    tracing::debug!(db_path = %db_path.display(), "Opened sync service");
    Ok(SyncService::new(
        config,
        SyncComponents {
            clock,
            session,
            tokens,
            remote,
            local,
            scheduler,
        },
    ))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("PRECIS_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("precis")
        .join("precis.db")
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

const fn decision_label(decision: PushDecision) -> &'static str {
    match decision {
        PushDecision::Disabled => "disabled",
        PushDecision::Bootstrapped => "uploaded (first sync)",
        PushDecision::Pushed => "uploaded",
        PushDecision::StaleWriteSkipped => "up to date",
        PushDecision::AppliedCloud => "updated from cloud",
        PushDecision::InSync => "in sync",
        PushDecision::ConflictPending => "conflict",
    }
}

pub fn format_outcome_lines(outcome: &SyncOutcome) -> Vec<String> {
    let Some(report) = outcome.report() else {
        return vec!["A sync is already running; another pass has been queued.".to_string()];
    };

    let mut lines = vec![
        format!("settings: {}", decision_label(report.settings)),
        format!("history:  {}", decision_label(report.history)),
        format!("library:  {}", decision_label(report.library)),
    ];
    match outcome {
        SyncOutcome::Completed { finished_at, .. } => {
            lines.push(format!(
                "Sync completed at {}",
                format_sync_timestamp(*finished_at)
            ));
        }
        SyncOutcome::ConflictPending { conflict, .. } => {
            lines.extend(format_conflict_lines(conflict));
        }
        SyncOutcome::AlreadyRunning => {}
    }
    lines
}

pub fn format_conflict_lines(conflict: &PendingSettingsConflict) -> Vec<String> {
    vec![
        "Settings differ between this device and the cloud.".to_string(),
        format!(
            "  local: {} keys, changed {}",
            conflict.local_settings.len(),
            format_sync_timestamp(conflict.local_timestamp)
        ),
        format!(
            "  cloud: {} keys, changed {}",
            conflict.cloud_settings.len(),
            format_sync_timestamp(conflict.cloud_timestamp)
        ),
        "Run `precis resolve local|cloud|cancel` to choose.".to_string(),
    ]
}

pub fn format_status_lines(status: &SyncStatus, now_ms: i64) -> Vec<String> {
    let mut lines = Vec::new();

    if status.is_logged_in {
        let account = status
            .user_profile
            .as_ref()
            .and_then(|profile| profile.email.as_deref())
            .unwrap_or("(unknown account)");
        lines.push(format!("Signed in as {account}"));
    } else {
        lines.push("Not signed in".to_string());
    }

    let auto_sync = match status.auto_sync {
        AutoSync::Unset => "on (default)",
        AutoSync::Enabled => "on",
        AutoSync::Disabled => "off",
    };
    lines.push(format!("Auto-sync: {auto_sync}"));

    let datasets = [
        ("settings", status.preferences.settings),
        ("history", status.preferences.history),
        ("library", status.preferences.library),
    ]
    .into_iter()
    .filter_map(|(name, enabled)| enabled.then_some(name))
    .collect::<Vec<_>>();
    lines.push(format!(
        "Datasets: {}",
        if datasets.is_empty() {
            "none".to_string()
        } else {
            datasets.join(", ")
        }
    ));

    lines.push(status.last_sync_time.map_or_else(
        || "Last sync: never".to_string(),
        |time| {
            format!(
                "Last sync: {} ({})",
                format_sync_timestamp(time),
                format_relative_time(time, now_ms)
            )
        },
    ));
    if let Some(error) = &status.last_sync_error {
        lines.push(format!("Last error: {error}"));
    }
    if status.conflict_pending {
        lines.push("Settings conflict pending".to_string());
    }
    lines.push(format!("Device: {}", status.device_id));
    lines
}
