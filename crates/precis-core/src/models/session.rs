//! Per-installation sync session model

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Auto-sync preference. `Unset` until the user makes a choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AutoSync {
    #[default]
    Unset,
    Enabled,
    Disabled,
}

impl AutoSync {
    /// Background triggers run unless auto-sync was explicitly turned off.
    #[must_use]
    pub const fn allows_background_sync(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl From<bool> for AutoSync {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

/// Which datasets take part in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct SyncPreferences {
    pub settings: bool,
    pub history: bool,
    pub library: bool,
}

impl Default for SyncPreferences {
    fn default() -> Self {
        Self {
            settings: true,
            history: true,
            library: true,
        }
    }
}

impl SyncPreferences {
    #[must_use]
    pub const fn any_enabled(&self) -> bool {
        self.settings || self.history || self.library
    }
}

/// Signed-in account details shown in the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Sync state of one installation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct SyncSession {
    #[serde(default)]
    pub is_logged_in: bool,
    #[serde(default)]
    pub auto_sync_enabled: AutoSync,
    /// Last fully successful cycle (Unix ms)
    #[serde(default)]
    pub last_sync_time: Option<i64>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token expiry (Unix ms)
    #[serde(default)]
    pub token_expiry: i64,
    pub device_id: Uuid,
    #[serde(default)]
    pub user_profile: Option<UserProfile>,
    #[serde(default)]
    pub sync_preferences: SyncPreferences,
    /// Set on every logout, cleared once the user picks a side in a settings conflict.
    #[serde(default = "default_true")]
    pub needs_settings_conflict_check: bool,
    /// Last background failure, for the status indicator.
    #[serde(default)]
    pub last_sync_error: Option<String>,
}

const fn default_true() -> bool {
    true
}

impl Default for SyncSession {
    fn default() -> Self {
        Self {
            is_logged_in: false,
            auto_sync_enabled: AutoSync::Unset,
            last_sync_time: None,
            access_token: None,
            refresh_token: None,
            token_expiry: 0,
            device_id: Uuid::now_v7(),
            user_profile: None,
            sync_preferences: SyncPreferences::default(),
            needs_settings_conflict_check: true,
            last_sync_error: None,
        }
    }
}

impl SyncSession {
    /// Drop credentials and account data, keeping device id and preferences.
    pub fn clear_credentials(&mut self) {
        self.is_logged_in = false;
        self.access_token = None;
        self.refresh_token = None;
        self.token_expiry = 0;
        self.user_profile = None;
        self.last_sync_time = None;
        self.needs_settings_conflict_check = true;
    }

    /// Whether the background path may start a cycle.
    #[must_use]
    pub const fn background_sync_allowed(&self) -> bool {
        self.is_logged_in && self.auto_sync_enabled.allows_background_sync()
    }
}

impl fmt::Debug for SyncSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |token: &Option<String>| token.as_ref().map(|_| "[REDACTED]");
        formatter
            .debug_struct("SyncSession")
            .field("is_logged_in", &self.is_logged_in)
            .field("auto_sync_enabled", &self.auto_sync_enabled)
            .field("last_sync_time", &self.last_sync_time)
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("token_expiry", &self.token_expiry)
            .field("device_id", &self.device_id)
            .field("user_profile", &self.user_profile)
            .field("sync_preferences", &self.sync_preferences)
            .field(
                "needs_settings_conflict_check",
                &self.needs_settings_conflict_check,
            )
            .field("last_sync_error", &self.last_sync_error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_needs_conflict_check() {
        let session = SyncSession::default();
        assert!(!session.is_logged_in);
        assert!(session.needs_settings_conflict_check);
        assert_eq!(session.auto_sync_enabled, AutoSync::Unset);
        assert!(session.sync_preferences.any_enabled());
    }

    #[test]
    fn debug_redacts_tokens() {
        let session = SyncSession {
            access_token: Some("secret-access-token".to_string()),
            refresh_token: Some("secret-refresh-token".to_string()),
            ..SyncSession::default()
        };
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-access-token"));
        assert!(!rendered.contains("secret-refresh-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn clear_credentials_keeps_device_and_preferences() {
        let mut session = SyncSession {
            is_logged_in: true,
            access_token: Some("a".into()),
            refresh_token: Some("r".into()),
            last_sync_time: Some(5),
            needs_settings_conflict_check: false,
            sync_preferences: SyncPreferences {
                history: false,
                ..SyncPreferences::default()
            },
            ..SyncSession::default()
        };
        let device_id = session.device_id;
        session.clear_credentials();

        assert!(!session.is_logged_in);
        assert!(session.refresh_token.is_none());
        assert!(session.needs_settings_conflict_check);
        assert_eq!(session.device_id, device_id);
        assert!(!session.sync_preferences.history);
    }

    #[test]
    fn background_sync_requires_login_and_not_disabled() {
        let mut session = SyncSession::default();
        assert!(!session.background_sync_allowed());
        session.is_logged_in = true;
        assert!(session.background_sync_allowed());
        session.auto_sync_enabled = AutoSync::Disabled;
        assert!(!session.background_sync_allowed());
    }

    #[test]
    fn session_json_uses_camel_case() {
        let json = serde_json::to_value(SyncSession::default()).unwrap();
        assert!(json.get("needsSettingsConflictCheck").is_some());
        assert!(json.get("autoSyncEnabled").is_some());
    }
}
