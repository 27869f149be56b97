use crate::classify::{backend_error, classify_message, Classifier};
use crate::privilege::verify_for_operation;
use anyhow::{bail, Result};
use policy_api::{PolicyBackend, PolicyValue, PrivilegeGate, TargetKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use warden_common::PolicyResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveAccess {
    Blocked,
    Allowed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveStatus {
    pub is_blocked: bool,
    pub status: DriveAccess,
}

impl DriveStatus {
    pub fn from_blocked(is_blocked: bool) -> Self {
        Self {
            is_blocked,
            status: if is_blocked {
                DriveAccess::Blocked
            } else {
                DriveAccess::Allowed
            },
        }
    }
}

/// Write protection for removable drives, a single flag on one target.
pub struct DrivePolicyController {
    gate: Arc<dyn PrivilegeGate>,
    backend: Arc<dyn PolicyBackend>,
    value_name: String,
    classify: Classifier,
}

impl DrivePolicyController {
    pub fn new(gate: Arc<dyn PrivilegeGate>, backend: Arc<dyn PolicyBackend>) -> Result<Self> {
        let target = backend.target();
        let TargetKind::RemovableStorage { value_name } = &target.kind else {
            bail!("target '{}' is not a removable storage policy target", target.id);
        };
        let value_name = value_name.clone();
        Ok(Self {
            gate,
            backend,
            value_name,
            classify: classify_message,
        })
    }

    pub fn with_classifier(mut self, classify: Classifier) -> Self {
        self.classify = classify;
        self
    }

    pub async fn block_write_access(&self) -> PolicyResult<DriveStatus> {
        self.set_write_protect("block-write-access", true).await
    }

    pub async fn allow_write_access(&self) -> PolicyResult<DriveStatus> {
        self.set_write_protect("allow-write-access", false).await
    }

    async fn set_write_protect(&self, operation: &str, blocked: bool) -> PolicyResult<DriveStatus> {
        verify_for_operation(self.gate.as_ref(), operation).await?;

        self.write_flag(blocked).await.map_err(|err| {
            let verb = if blocked { "block" } else { "allow" };
            backend_error(
                self.classify,
                &err,
                format!("Failed to {verb} write access to removable drives"),
            )
        })?;

        info!(operation, blocked, "removable drive write protection updated");
        Ok(DriveStatus::from_blocked(blocked))
    }

    async fn write_flag(&self, blocked: bool) -> Result<()> {
        self.backend.ensure_key("").await?;
        self.backend
            .set_value("", &self.value_name, PolicyValue::Dword(u32::from(blocked)))
            .await
    }

    /// Read-only; an unreadable or missing flag reports write access as allowed.
    pub async fn write_access_status(&self) -> DriveStatus {
        match self.backend.get_value("", &self.value_name).await {
            Ok(Some(value)) => DriveStatus::from_blocked(value.as_dword() == Some(1)),
            Ok(None) => DriveStatus::from_blocked(false),
            Err(err) => {
                debug!(error = %format!("{err:#}"), "drive status unreadable, assuming allowed");
                DriveStatus::from_blocked(false)
            }
        }
    }
}
