//! Shared types for the Warden policy components.

pub mod config;
pub mod domain;
pub mod paths;
pub mod result;
pub mod settings;

pub use config::{BackendKind, WardenConfig};
pub use domain::{normalize_domain, parse_all, validate_domain, DomainEntry, Whitelist};
pub use result::{Envelope, ErrorCode, PolicyError, PolicyResult};
pub use settings::{PersistedState, Settings, SettingsPatch, TogglePatch, ToggleState};

