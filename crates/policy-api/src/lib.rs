//! Policy backend abstraction.
//!
//! A [`PolicyBackend`] executes primitive key/value mutations against one
//! external policy surface (one browser's policy hive, or the removable
//! storage policy key) and reads state back. Targets are plain data
//! ([`PolicyTarget`]) so the set of browsers is configuration, not control
//! flow.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod memory;
pub mod targets;

pub use memory::{BackendCall, BackendOp, MemoryBackend, RegistryHive, SharedHive};

/// A value stored under a policy key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PolicyValue {
    Dword(u32),
    String(String),
}

impl PolicyValue {
    pub fn as_dword(&self) -> Option<u32> {
        match self {
            Self::Dword(value) => Some(*value),
            Self::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            Self::Dword(_) => None,
        }
    }
}

impl fmt::Display for PolicyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dword(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
        }
    }
}

/// What a target enforces and where its rule containers live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    /// OS-wide write protection flag for removable drives.
    RemovableStorage { value_name: String },
    /// One browser's URL filtering policy.
    Browser {
        blocklist_key: String,
        allowlist_key: String,
        /// Blocklist rule that matches every URL.
        block_all_token: String,
    },
}

/// One external policy surface. Built at startup, immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTarget {
    pub id: String,
    pub display_name: String,
    /// Root key of the target, e.g. `HKLM:\SOFTWARE\Policies\Google\Chrome`.
    pub location: String,
    pub kind: TargetKind,
}

impl PolicyTarget {
    /// Full path of `key` below the target root; an empty key is the root.
    pub fn key_path(&self, key: &str) -> String {
        if key.is_empty() {
            self.location.clone()
        } else {
            format!("{}\\{}", self.location, key)
        }
    }

    pub fn is_browser(&self) -> bool {
        matches!(self.kind, TargetKind::Browser { .. })
    }
}

/// Primitive operations against one policy target.
///
/// Keys are relative to [`PolicyTarget::location`]. Each call is a single
/// external invocation that may be slow; none of them are retried here.
#[async_trait]
pub trait PolicyBackend: Send + Sync {
    fn target(&self) -> &PolicyTarget;

    /// Create `key` if it does not exist yet.
    async fn ensure_key(&self, key: &str) -> Result<()>;

    async fn set_value(&self, key: &str, name: &str, value: PolicyValue) -> Result<()>;

    /// `Ok(None)` when the key or the value is absent.
    async fn get_value(&self, key: &str, name: &str) -> Result<Option<PolicyValue>>;

    /// All values under `key`; empty when the key is absent.
    async fn list_values(&self, key: &str) -> Result<Vec<(String, PolicyValue)>>;

    /// Remove `key` and everything below it. Removing an absent key succeeds.
    async fn delete_key(&self, key: &str) -> Result<()>;
}

/// Yes/no elevation check consulted before every mutation.
///
/// Implementations must not cache: elevation can change between calls.
#[async_trait]
pub trait PrivilegeGate: Send + Sync {
    async fn check_privileges(&self) -> bool;
}

/// Gate with a fixed answer, used by the simulated backend and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticPrivilegeGate(pub bool);

#[async_trait]
impl PrivilegeGate for StaticPrivilegeGate {
    async fn check_privileges(&self) -> bool {
        self.0
    }
}
