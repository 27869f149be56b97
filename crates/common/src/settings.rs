//! Durable settings and toggle flags, with merge-on-write patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User-facing settings persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub drive_block_enabled: bool,
    pub website_block_enabled: bool,
    pub whitelist_enabled: bool,
    pub whitelisted_domains: Vec<String>,
}

/// Partial update for [`Settings`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drive_block_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_block_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelisted_domains: Option<Vec<String>>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(value) = self.drive_block_enabled {
            settings.drive_block_enabled = value;
        }
        if let Some(value) = self.website_block_enabled {
            settings.website_block_enabled = value;
        }
        if let Some(value) = self.whitelist_enabled {
            settings.whitelist_enabled = value;
        }
        if let Some(domains) = &self.whitelisted_domains {
            settings.whitelisted_domains = domains.clone();
        }
    }
}

/// The three independent toggles plus the last reconciliation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToggleState {
    pub drive_block: bool,
    pub website_block: bool,
    pub whitelist: bool,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TogglePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drive_block: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_block: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
}

impl TogglePatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply_to(&self, toggles: &mut ToggleState) {
        if let Some(value) = self.drive_block {
            toggles.drive_block = value;
        }
        if let Some(value) = self.website_block {
            toggles.website_block = value;
        }
        if let Some(value) = self.whitelist {
            toggles.whitelist = value;
        }
        if let Some(ts) = self.last_synced {
            toggles.last_synced = Some(ts);
        }
    }
}

/// On-disk layout of the persistent state file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub settings: Settings,
    pub toggles: ToggleState,
}
