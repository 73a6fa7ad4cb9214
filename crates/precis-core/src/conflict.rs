//! Settings conflict detection.
//!
//! Settings are a single last-write-wins value. The first sync after a login
//! (or after any logout) may find two genuinely different settings documents,
//! e.g. when a different account signs in on this device. In that case the
//! user picks a side instead of the clock.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{LocalSettings, SettingsDocument};

/// A divergence waiting for the user's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSettingsConflict {
    pub local_settings: Map<String, Value>,
    pub cloud_settings: Map<String, Value>,
    pub local_timestamp: i64,
    pub cloud_timestamp: i64,
}

impl PendingSettingsConflict {
    #[must_use]
    pub fn local(&self) -> LocalSettings {
        LocalSettings::new(self.local_settings.clone(), self.local_timestamp)
    }

    #[must_use]
    pub fn cloud(&self) -> LocalSettings {
        LocalSettings::new(self.cloud_settings.clone(), self.cloud_timestamp)
    }
}

/// User's answer to a pending conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictChoice {
    /// Keep this device's settings and push them.
    Local,
    /// Replace this device's settings with the cloud copy.
    Cloud,
    /// Decide later; auto-sync is turned off until then.
    Cancel,
}

/// Lifecycle of a settings conflict.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConflictState {
    #[default]
    None,
    Pending(PendingSettingsConflict),
    ResolvedLocal,
    ResolvedCloud,
    Cancelled,
}

impl ConflictState {
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    #[must_use]
    pub const fn pending(&self) -> Option<&PendingSettingsConflict> {
        match self {
            Self::Pending(conflict) => Some(conflict),
            _ => None,
        }
    }

    /// Terminal state reached by applying `choice`.
    #[must_use]
    pub const fn after(choice: ConflictChoice) -> Self {
        match choice {
            ConflictChoice::Local => Self::ResolvedLocal,
            ConflictChoice::Cloud => Self::ResolvedCloud,
            ConflictChoice::Cancel => Self::Cancelled,
        }
    }
}

/// What the sync cycle should do with the settings document.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsDecision {
    /// Both sides hold the same data.
    InSync,
    /// Local is newer, or the timestamps tie: push local.
    PushLocal,
    /// Cloud is strictly newer: apply it locally.
    ApplyCloud,
    /// Ask the user.
    Conflict(PendingSettingsConflict),
}

/// Decide how to reconcile local settings with the cloud document.
///
/// A conflict is raised only when the data differs *and* the session still
/// needs a first-sync check. Otherwise the newer side wins and an exact tie
/// pushes local. Equal timestamps with different content on two devices
/// therefore resolve to whichever device syncs, regardless of clock skew.
pub fn evaluate_settings(
    local: &LocalSettings,
    cloud: &SettingsDocument,
    needs_conflict_check: bool,
) -> SettingsDecision {
    if local.data == cloud.data {
        return SettingsDecision::InSync;
    }

    if needs_conflict_check {
        return SettingsDecision::Conflict(PendingSettingsConflict {
            local_settings: local.data.clone(),
            cloud_settings: cloud.data.clone(),
            local_timestamp: local.updated_at,
            cloud_timestamp: cloud.updated_at,
        });
    }

    if cloud.updated_at > local.updated_at {
        SettingsDecision::ApplyCloud
    } else {
        SettingsDecision::PushLocal
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn settings(theme: &str) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("theme".into(), json!(theme));
        data
    }

    #[test]
    fn identical_data_is_in_sync() {
        let local = LocalSettings::new(settings("dark"), 100);
        let cloud = SettingsDocument::new(settings("dark"), 50);
        assert_eq!(evaluate_settings(&local, &cloud, true), SettingsDecision::InSync);
    }

    #[test]
    fn first_sync_difference_is_a_conflict() {
        let local = LocalSettings::new(settings("dark"), 100);
        let cloud = SettingsDocument::new(settings("light"), 50);

        let SettingsDecision::Conflict(conflict) = evaluate_settings(&local, &cloud, true) else {
            panic!("expected a conflict");
        };
        assert_eq!(conflict.local_timestamp, 100);
        assert_eq!(conflict.cloud_timestamp, 50);
        assert_eq!(conflict.cloud_settings, settings("light"));
    }

    #[test]
    fn without_check_newer_side_wins() {
        let local = LocalSettings::new(settings("dark"), 100);
        let older_cloud = SettingsDocument::new(settings("light"), 50);
        let newer_cloud = SettingsDocument::new(settings("light"), 150);

        assert_eq!(
            evaluate_settings(&local, &older_cloud, false),
            SettingsDecision::PushLocal
        );
        assert_eq!(
            evaluate_settings(&local, &newer_cloud, false),
            SettingsDecision::ApplyCloud
        );
    }

    #[test]
    fn timestamp_tie_pushes_local() {
        let local = LocalSettings::new(settings("dark"), 100);
        let cloud = SettingsDocument::new(settings("light"), 100);
        assert_eq!(
            evaluate_settings(&local, &cloud, false),
            SettingsDecision::PushLocal
        );
    }

    #[test]
    fn state_transitions() {
        assert!(!ConflictState::default().is_pending());
        assert_eq!(
            ConflictState::after(ConflictChoice::Cancel),
            ConflictState::Cancelled
        );
        assert_eq!(
            ConflictState::after(ConflictChoice::Local),
            ConflictState::ResolvedLocal
        );
    }
}
