//! Policy orchestration: dispatches typed policy requests to the drive and
//! browser controllers and keeps the persisted settings and toggles in
//! line with what was actually applied.

use crate::aggregate::AggregateOutcome;
use crate::browser::{BrowserPolicyController, BrowserStatus, DomainChange};
use crate::drive::{DrivePolicyController, DriveStatus};
use crate::privilege::verify_for_operation;
use crate::store::StateStore;
use chrono::Utc;
use policy_api::{PolicyBackend, PrivilegeGate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use warden_common::{
    ErrorCode, PolicyError, PolicyResult, Settings, SettingsPatch, ToggleState, TogglePatch,
};

/// Policy families accepted by [`PolicyOrchestrator::apply_policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Drive,
    Browser,
    Whitelist,
    Domain,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drive => "drive",
            Self::Browser => "browser",
            Self::Whitelist => "whitelist",
            Self::Domain => "domain",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drive" => Ok(Self::Drive),
            "browser" => Ok(Self::Browser),
            "whitelist" => Ok(Self::Whitelist),
            "domain" => Ok(Self::Domain),
            other => Err(PolicyError::new(
                ErrorCode::InvalidPolicyType,
                format!("Unknown policy type '{other}'"),
            )
            .with_details(serde_json::json!({
                "supported": ["drive", "browser", "whitelist", "domain"]
            }))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveSettings {
    pub block_write_access: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSettings {
    pub block_all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistSettings {
    pub enabled: bool,
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSettings {
    pub action: DomainAction,
    pub domain: String,
}

/// A validated policy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyRequest {
    Drive(DriveSettings),
    Browser(BrowserSettings),
    Whitelist(WhitelistSettings),
    Domain(DomainSettings),
}

impl PolicyRequest {
    /// Check `settings` against the shape `kind` requires.
    pub fn parse(kind: &str, settings: &Value) -> PolicyResult<Self> {
        let kind: PolicyKind = kind.parse()?;
        let request = match kind {
            PolicyKind::Drive => Self::Drive(shape(kind, settings)?),
            PolicyKind::Browser => Self::Browser(shape(kind, settings)?),
            PolicyKind::Whitelist => Self::Whitelist(shape(kind, settings)?),
            PolicyKind::Domain => Self::Domain(shape(kind, settings)?),
        };
        Ok(request)
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::Drive(_) => PolicyKind::Drive,
            Self::Browser(_) => PolicyKind::Browser,
            Self::Whitelist(_) => PolicyKind::Whitelist,
            Self::Domain(_) => PolicyKind::Domain,
        }
    }

    /// Operation name used for privilege messages and logs.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Drive(s) if s.block_write_access => "block-write-access",
            Self::Drive(_) => "allow-write-access",
            Self::Browser(s) if s.block_all => "block-all-websites",
            Self::Browser(_) => "unblock-all-websites",
            Self::Whitelist(s) if s.enabled => "enable-whitelist",
            Self::Whitelist(_) => "disable-whitelist",
            Self::Domain(s) if s.action == DomainAction::Add => "add-domain",
            Self::Domain(_) => "remove-domain",
        }
    }
}

fn shape<T: serde::de::DeserializeOwned>(kind: PolicyKind, settings: &Value) -> PolicyResult<T> {
    serde_json::from_value(settings.clone()).map_err(|err| {
        PolicyError::invalid_settings(format!("Invalid settings for policy type '{kind}'"))
            .with_details(err.to_string())
    })
}

/// What an applied request changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PolicyOutcome {
    Drive(DriveStatus),
    #[serde(rename_all = "camelCase")]
    Browser { block_all: bool, outcome: AggregateOutcome },
    #[serde(rename_all = "camelCase")]
    Whitelist {
        enabled: bool,
        domains: Vec<String>,
        outcome: AggregateOutcome,
    },
    Domain(DomainChange),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    pub drive: DriveStatus,
    pub whitelist_active: bool,
    pub domains: Vec<String>,
    pub domain_count: usize,
    pub settings: Settings,
    pub toggles: ToggleState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResetStepKind {
    AllowWriteAccess,
    UnblockAllWebsites,
    DisableWhitelist,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetStep {
    pub step: ResetStepKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PolicyError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    pub steps: Vec<ResetStep>,
    pub success: bool,
}

impl ResetReport {
    pub fn step(&self, kind: ResetStepKind) -> Option<&ResetStep> {
        self.steps.iter().find(|s| s.step == kind)
    }

    fn succeeded(&self, kind: ResetStepKind) -> bool {
        self.step(kind).map(|s| s.success).unwrap_or(false)
    }
}

pub struct PolicyOrchestrator {
    gate: Arc<dyn PrivilegeGate>,
    drive: DrivePolicyController,
    browser: BrowserPolicyController,
    store: Arc<dyn StateStore>,
}

impl PolicyOrchestrator {
    pub fn new(
        gate: Arc<dyn PrivilegeGate>,
        drive: DrivePolicyController,
        browser: BrowserPolicyController,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            gate,
            drive,
            browser,
            store,
        }
    }

    /// Wire both controllers against one gate.
    pub fn assemble(
        gate: Arc<dyn PrivilegeGate>,
        drive: Arc<dyn PolicyBackend>,
        browsers: Vec<Arc<dyn PolicyBackend>>,
        domain_source: usize,
        store: Arc<dyn StateStore>,
    ) -> anyhow::Result<Self> {
        let drive = DrivePolicyController::new(gate.clone(), drive)?;
        let browser = BrowserPolicyController::new(gate.clone(), browsers, domain_source)?;
        Ok(Self::new(gate, drive, browser, store))
    }

    pub fn drive(&self) -> &DrivePolicyController {
        &self.drive
    }

    pub fn browser(&self) -> &BrowserPolicyController {
        &self.browser
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub async fn check_privileges(&self) -> bool {
        self.gate.check_privileges().await
    }

    /// Parse and apply an untyped request.
    pub async fn apply_policy(&self, kind: &str, settings: &Value) -> PolicyResult<PolicyOutcome> {
        let request = match self.admit(kind, settings).await {
            Ok(request) => request,
            Err(err) => {
                info!(
                    kind,
                    action = "rejected",
                    success = false,
                    code = %err.code,
                    "policy applied"
                );
                return Err(err);
            }
        };
        self.apply(request).await
    }

    async fn admit(&self, kind: &str, settings: &Value) -> PolicyResult<PolicyRequest> {
        verify_for_operation(self.gate.as_ref(), "apply-policy").await?;
        PolicyRequest::parse(kind, settings)
    }

    #[instrument(skip(self, request), fields(kind = %request.kind(), action = request.action()))]
    pub async fn apply(&self, request: PolicyRequest) -> PolicyResult<PolicyOutcome> {
        let result = self.dispatch(&request).await;
        info!(success = result.is_ok(), "policy applied");
        let outcome = result?;
        self.record(&outcome).await?;
        Ok(outcome)
    }

    async fn dispatch(&self, request: &PolicyRequest) -> PolicyResult<PolicyOutcome> {
        match request {
            PolicyRequest::Drive(settings) => {
                let status = if settings.block_write_access {
                    self.drive.block_write_access().await?
                } else {
                    self.drive.allow_write_access().await?
                };
                Ok(PolicyOutcome::Drive(status))
            }
            PolicyRequest::Browser(settings) => {
                let outcome = if settings.block_all {
                    self.browser.block_all_websites().await?
                } else {
                    self.browser.unblock_all_websites().await?
                };
                Ok(PolicyOutcome::Browser {
                    block_all: settings.block_all,
                    outcome,
                })
            }
            PolicyRequest::Whitelist(settings) if settings.enabled => {
                let update = self
                    .browser
                    .enable_whitelist(settings.domains.as_slice())
                    .await?;
                Ok(PolicyOutcome::Whitelist {
                    enabled: true,
                    domains: update.domains,
                    outcome: update.outcome,
                })
            }
            PolicyRequest::Whitelist(_) => {
                let outcome = self.browser.disable_whitelist().await?;
                Ok(PolicyOutcome::Whitelist {
                    enabled: false,
                    domains: Vec::new(),
                    outcome,
                })
            }
            PolicyRequest::Domain(settings) => {
                let change = match settings.action {
                    DomainAction::Add => self.browser.add_domain(&settings.domain).await?,
                    DomainAction::Remove => self.browser.remove_domain(&settings.domain).await?,
                };
                Ok(PolicyOutcome::Domain(change))
            }
        }
    }

    /// Persist what `outcome` changed on the system.
    async fn record(&self, outcome: &PolicyOutcome) -> PolicyResult<()> {
        let (settings, toggles) = match outcome {
            PolicyOutcome::Drive(status) => (
                SettingsPatch {
                    drive_block_enabled: Some(status.is_blocked),
                    ..Default::default()
                },
                TogglePatch {
                    drive_block: Some(status.is_blocked),
                    ..Default::default()
                },
            ),
            PolicyOutcome::Browser { block_all, .. } => (
                SettingsPatch {
                    website_block_enabled: Some(*block_all),
                    ..Default::default()
                },
                TogglePatch {
                    website_block: Some(*block_all),
                    ..Default::default()
                },
            ),
            // Disabling keeps the stored domains so the whitelist can be
            // re-enabled with the same list.
            PolicyOutcome::Whitelist {
                enabled, domains, ..
            } => (
                SettingsPatch {
                    whitelist_enabled: Some(*enabled),
                    whitelisted_domains: enabled.then(|| domains.clone()),
                    ..Default::default()
                },
                TogglePatch {
                    whitelist: Some(*enabled),
                    ..Default::default()
                },
            ),
            PolicyOutcome::Domain(change) if change.changed() => {
                let active = !change.domains.is_empty();
                (
                    SettingsPatch {
                        whitelist_enabled: Some(active),
                        whitelisted_domains: Some(change.domains.clone()),
                        ..Default::default()
                    },
                    TogglePatch {
                        whitelist: Some(active),
                        ..Default::default()
                    },
                )
            }
            PolicyOutcome::Domain(_) => return Ok(()),
        };
        self.persist(settings, toggles)
            .await
            .map_err(|err| {
                state_error(
                    ErrorCode::PolicyApplicationError,
                    "Policy applied but state could not be saved",
                    &err,
                )
            })
    }

    async fn persist(&self, settings: SettingsPatch, toggles: TogglePatch) -> anyhow::Result<()> {
        if !settings.is_empty() {
            self.store.update_settings(settings).await?;
        }
        if !toggles.is_empty() {
            self.store.update_toggle_states(toggles).await?;
        }
        Ok(())
    }

    /// Snapshot of the real system state plus what is persisted.
    ///
    /// Backend read failures degrade to "not blocked" / "no domains".
    pub async fn current_policy_status(&self) -> PolicyResult<PolicyStatus> {
        let drive = self.drive.write_access_status().await;
        let list = self.browser.domain_list().await;
        let (settings, toggles) = self.load_state().await.map_err(|err| {
            state_error(ErrorCode::StatusRetrievalError, "Failed to read policy status", &err)
        })?;
        Ok(PolicyStatus {
            drive,
            whitelist_active: list.count > 0,
            domain_count: list.count,
            domains: list.domains,
            settings,
            toggles,
        })
    }

    async fn load_state(&self) -> anyhow::Result<(Settings, ToggleState)> {
        Ok((self.store.settings().await?, self.store.toggle_states().await?))
    }

    /// Re-read system state and overwrite the persisted toggles with it.
    ///
    /// Website blocking has no read-back here and always syncs as off.
    pub async fn sync_policy_states(&self) -> PolicyResult<ToggleState> {
        let drive = self.drive.write_access_status().await;
        let list = self.browser.domain_list().await;
        let whitelist_active = list.count > 0;
        debug!(
            drive_blocked = drive.is_blocked,
            whitelist_active, "reconciling persisted toggles"
        );

        let toggles = TogglePatch {
            drive_block: Some(drive.is_blocked),
            website_block: Some(false),
            whitelist: Some(whitelist_active),
            last_synced: Some(Utc::now()),
        };
        let settings = SettingsPatch {
            drive_block_enabled: Some(drive.is_blocked),
            whitelist_enabled: Some(whitelist_active),
            whitelisted_domains: whitelist_active.then_some(list.domains),
            ..Default::default()
        };

        let sync = async {
            self.store.update_settings(settings).await?;
            self.store.update_toggle_states(toggles).await
        };
        let synced = sync
            .await
            .map_err(|err| {
                state_error(ErrorCode::SyncError, "Failed to sync policy states", &err)
            })?;
        info!(
            drive_block = synced.drive_block,
            whitelist = synced.whitelist,
            "policy states synced"
        );
        Ok(synced)
    }

    /// Return every policy to its permissive state.
    ///
    /// All three steps are attempted even when earlier ones fail; only the
    /// steps that succeeded are recorded as off.
    pub async fn reset_all_policies(&self) -> PolicyResult<ResetReport> {
        verify_for_operation(self.gate.as_ref(), "reset-all-policies").await?;

        let steps = vec![
            reset_step(
                ResetStepKind::AllowWriteAccess,
                self.drive.allow_write_access().await.map(|_| ()),
            ),
            reset_step(
                ResetStepKind::UnblockAllWebsites,
                self.browser.unblock_all_websites().await.map(|_| ()),
            ),
            reset_step(
                ResetStepKind::DisableWhitelist,
                self.browser.disable_whitelist().await.map(|_| ()),
            ),
        ];
        let report = ResetReport {
            success: steps.iter().all(|s| s.success),
            steps,
        };

        let mut settings = SettingsPatch::default();
        let mut toggles = TogglePatch::default();
        if report.succeeded(ResetStepKind::AllowWriteAccess) {
            settings.drive_block_enabled = Some(false);
            toggles.drive_block = Some(false);
        }
        if report.succeeded(ResetStepKind::UnblockAllWebsites) {
            settings.website_block_enabled = Some(false);
            toggles.website_block = Some(false);
        }
        // Disabling the whitelist also clears the blocklist.
        if report.succeeded(ResetStepKind::DisableWhitelist) {
            settings.website_block_enabled = Some(false);
            settings.whitelist_enabled = Some(false);
            toggles.website_block = Some(false);
            toggles.whitelist = Some(false);
        }
        let persisted = self.persist(settings, toggles).await;

        if !report.success {
            let failed = report.steps.iter().filter(|s| !s.success).count();
            error!(failed, "policy reset incomplete");
            return Err(PolicyError::new(
                ErrorCode::PartialResetFailure,
                format!("{failed} of {} reset steps failed", report.steps.len()),
            )
            .with_details(serde_json::to_value(&report).unwrap_or_default())
            .recoverable(true));
        }
        persisted.map_err(|err| {
            state_error(
                ErrorCode::PolicyApplicationError,
                "Policies reset but state could not be saved",
                &err,
            )
        })?;
        info!("all policies reset");
        Ok(report)
    }

    pub async fn browser_status(&self) -> Vec<BrowserStatus> {
        self.browser.browser_status().await
    }
}

fn reset_step(step: ResetStepKind, result: PolicyResult<()>) -> ResetStep {
    match result {
        Ok(()) => ResetStep {
            step,
            success: true,
            error: None,
        },
        Err(error) => ResetStep {
            step,
            success: false,
            error: Some(error),
        },
    }
}

fn state_error(code: ErrorCode, message: &str, err: &anyhow::Error) -> PolicyError {
    error!(error = %format!("{err:#}"), "{message}");
    PolicyError::new(code, message)
        .with_details(format!("{err:#}"))
        .recoverable(true)
}
