//! Results reported by the sync service.

use serde::Serialize;
use uuid::Uuid;

use crate::conflict::PendingSettingsConflict;
use crate::models::{AutoSync, SyncPreferences, UserProfile};

/// What a cycle did with one remote document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PushDecision {
    /// Disabled in the sync preferences.
    #[default]
    Disabled,
    /// No remote copy existed; local data was uploaded.
    Bootstrapped,
    /// The merged (or newer local) result was uploaded.
    Pushed,
    /// The remote copy already held everything; no write was made.
    StaleWriteSkipped,
    /// The newer remote settings were applied locally.
    AppliedCloud,
    /// Both sides were identical.
    InSync,
    /// The user has to pick a side before settings sync resumes.
    ConflictPending,
}

/// Per-document decisions of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub settings: PushDecision,
    pub history: PushDecision,
    pub library: PushDecision,
}

impl SyncReport {
    /// Number of documents uploaded in the cycle.
    #[must_use]
    pub fn pushes(&self) -> usize {
        [self.settings, self.history, self.library]
            .into_iter()
            .filter(|decision| {
                matches!(decision, PushDecision::Pushed | PushDecision::Bootstrapped)
            })
            .count()
    }
}

/// Result of a `pull`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SyncOutcome {
    /// The cycle ran to the end; `last_sync_time` was advanced.
    Completed { report: SyncReport, finished_at: i64 },
    /// History and library were processed, settings wait for the user.
    ConflictPending {
        report: SyncReport,
        conflict: PendingSettingsConflict,
    },
    /// Another cycle was running; a follow-up cycle has been queued.
    AlreadyRunning,
}

impl SyncOutcome {
    #[must_use]
    pub const fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed { report, .. } | Self::ConflictPending { report, .. } => Some(report),
            Self::AlreadyRunning => None,
        }
    }
}

/// Snapshot for the status indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_logged_in: bool,
    pub auto_sync: AutoSync,
    pub is_syncing: bool,
    pub last_sync_time: Option<i64>,
    pub last_sync_error: Option<String>,
    pub conflict_pending: bool,
    pub user_profile: Option<UserProfile>,
    pub preferences: SyncPreferences,
    pub device_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_uploads() {
        let report = SyncReport {
            settings: PushDecision::InSync,
            history: PushDecision::Bootstrapped,
            library: PushDecision::Pushed,
        };
        assert_eq!(report.pushes(), 2);
        assert_eq!(SyncReport::default().pushes(), 0);
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = SyncOutcome::Completed {
            report: SyncReport::default(),
            finished_at: 5,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["report"]["history"], "disabled");
    }
}
