//! Built-in policy target descriptors.

use crate::{PolicyTarget, TargetKind};

pub const WRITE_PROTECT_VALUE: &str = "WriteProtect";

pub fn removable_storage() -> PolicyTarget {
    PolicyTarget {
        id: "removable-storage".to_string(),
        display_name: "Removable storage".to_string(),
        location: r"HKLM:\SYSTEM\CurrentControlSet\Control\StorageDevicePolicies".to_string(),
        kind: TargetKind::RemovableStorage {
            value_name: WRITE_PROTECT_VALUE.to_string(),
        },
    }
}

fn chromium(id: &str, display_name: &str, location: &str) -> PolicyTarget {
    PolicyTarget {
        id: id.to_string(),
        display_name: display_name.to_string(),
        location: location.to_string(),
        kind: TargetKind::Browser {
            blocklist_key: "URLBlocklist".to_string(),
            allowlist_key: "URLAllowlist".to_string(),
            block_all_token: "*".to_string(),
        },
    }
}

pub fn chrome() -> PolicyTarget {
    chromium("chrome", "Google Chrome", r"HKLM:\SOFTWARE\Policies\Google\Chrome")
}

pub fn edge() -> PolicyTarget {
    chromium("edge", "Microsoft Edge", r"HKLM:\SOFTWARE\Policies\Microsoft\Edge")
}

pub fn firefox() -> PolicyTarget {
    PolicyTarget {
        id: "firefox".to_string(),
        display_name: "Mozilla Firefox".to_string(),
        location: r"HKLM:\SOFTWARE\Policies\Mozilla\Firefox".to_string(),
        kind: TargetKind::Browser {
            blocklist_key: r"WebsiteFilter\Block".to_string(),
            allowlist_key: r"WebsiteFilter\Exceptions".to_string(),
            block_all_token: "<all_urls>".to_string(),
        },
    }
}

/// Look up a browser target by its id (case-insensitive).
pub fn browser(name: &str) -> Option<PolicyTarget> {
    match name.trim().to_ascii_lowercase().as_str() {
        "chrome" | "google-chrome" => Some(chrome()),
        "edge" | "msedge" => Some(edge()),
        "firefox" => Some(firefox()),
        _ => None,
    }
}
