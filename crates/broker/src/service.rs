//! Named operations exposed to callers, mapped onto the orchestrator.

use crate::browser::{BrowserStatus, DomainList};
use crate::orchestrator::{
    BrowserSettings, DomainAction, DomainSettings, DriveSettings, PolicyOrchestrator,
    PolicyOutcome, PolicyRequest, PolicyStatus, ResetReport, WhitelistSettings,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use warden_common::{ErrorCode, PolicyError, PolicyResult, ToggleState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    ToggleDriveBlock,
    ToggleWebsiteBlock,
    ToggleWhitelist,
    AddDomain,
    RemoveDomain,
    GetDomains,
    GetBlockedDomains,
    GetStatus,
    SyncPolicyStates,
    ResetAllPolicies,
    ApplyPolicy,
    CheckPrivileges,
    GetBrowserStatus,
}

impl Operation {
    pub const ALL: [Operation; 13] = [
        Self::ToggleDriveBlock,
        Self::ToggleWebsiteBlock,
        Self::ToggleWhitelist,
        Self::AddDomain,
        Self::RemoveDomain,
        Self::GetDomains,
        Self::GetBlockedDomains,
        Self::GetStatus,
        Self::SyncPolicyStates,
        Self::ResetAllPolicies,
        Self::ApplyPolicy,
        Self::CheckPrivileges,
        Self::GetBrowserStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToggleDriveBlock => "toggle-drive-block",
            Self::ToggleWebsiteBlock => "toggle-website-block",
            Self::ToggleWhitelist => "toggle-whitelist",
            Self::AddDomain => "add-domain",
            Self::RemoveDomain => "remove-domain",
            Self::GetDomains => "get-domains",
            Self::GetBlockedDomains => "get-blocked-domains",
            Self::GetStatus => "get-status",
            Self::SyncPolicyStates => "sync-policy-states",
            Self::ResetAllPolicies => "reset-all-policies",
            Self::ApplyPolicy => "apply-policy",
            Self::CheckPrivileges => "check-privileges",
            Self::GetBrowserStatus => "get-browser-status",
        }
    }

    /// Whether the operation changes system or persisted state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::ToggleDriveBlock
                | Self::ToggleWebsiteBlock
                | Self::ToggleWhitelist
                | Self::AddDomain
                | Self::RemoveDomain
                | Self::SyncPolicyStates
                | Self::ResetAllPolicies
                | Self::ApplyPolicy
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        if name == "get-whitelisted-domains" {
            return Ok(Self::GetDomains);
        }
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == name)
            .ok_or_else(|| {
                PolicyError::new(ErrorCode::InvalidPolicyType, format!("Unknown operation '{s}'"))
            })
    }
}

/// One call into the service with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    ToggleDriveBlock { enabled: bool },
    ToggleWebsiteBlock { enabled: bool },
    ToggleWhitelist { enabled: bool },
    AddDomain { domain: String },
    RemoveDomain { domain: String },
    GetDomains,
    GetBlockedDomains,
    GetStatus,
    SyncPolicyStates,
    ResetAllPolicies,
    ApplyPolicy { kind: String, settings: Value },
    CheckPrivileges,
    GetBrowserStatus,
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Self::ToggleDriveBlock { .. } => Operation::ToggleDriveBlock,
            Self::ToggleWebsiteBlock { .. } => Operation::ToggleWebsiteBlock,
            Self::ToggleWhitelist { .. } => Operation::ToggleWhitelist,
            Self::AddDomain { .. } => Operation::AddDomain,
            Self::RemoveDomain { .. } => Operation::RemoveDomain,
            Self::GetDomains => Operation::GetDomains,
            Self::GetBlockedDomains => Operation::GetBlockedDomains,
            Self::GetStatus => Operation::GetStatus,
            Self::SyncPolicyStates => Operation::SyncPolicyStates,
            Self::ResetAllPolicies => Operation::ResetAllPolicies,
            Self::ApplyPolicy { .. } => Operation::ApplyPolicy,
            Self::CheckPrivileges => Operation::CheckPrivileges,
            Self::GetBrowserStatus => Operation::GetBrowserStatus,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedDomains {
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivilegeReport {
    pub is_elevated: bool,
}

/// Typed service payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Outcome(PolicyOutcome),
    Domains(DomainList),
    Blocked(BlockedDomains),
    Status(PolicyStatus),
    Toggles(ToggleState),
    Reset(ResetReport),
    Privileges(PrivilegeReport),
    Browsers(Vec<BrowserStatus>),
}

pub struct PolicyService {
    orchestrator: PolicyOrchestrator,
}

impl PolicyService {
    pub fn new(orchestrator: PolicyOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &PolicyOrchestrator {
        &self.orchestrator
    }

    pub async fn handle(&self, request: Request) -> PolicyResult<Response> {
        let orchestrator = &self.orchestrator;
        let response = match request {
            Request::ToggleDriveBlock { enabled } => Response::Outcome(
                orchestrator
                    .apply(PolicyRequest::Drive(DriveSettings {
                        block_write_access: enabled,
                    }))
                    .await?,
            ),
            Request::ToggleWebsiteBlock { enabled } => Response::Outcome(
                orchestrator
                    .apply(PolicyRequest::Browser(BrowserSettings { block_all: enabled }))
                    .await?,
            ),
            Request::ToggleWhitelist { enabled } => {
                Response::Outcome(self.toggle_whitelist(enabled).await?)
            }
            Request::AddDomain { domain } => Response::Outcome(
                orchestrator
                    .apply(PolicyRequest::Domain(DomainSettings {
                        action: DomainAction::Add,
                        domain,
                    }))
                    .await?,
            ),
            Request::RemoveDomain { domain } => Response::Outcome(
                orchestrator
                    .apply(PolicyRequest::Domain(DomainSettings {
                        action: DomainAction::Remove,
                        domain,
                    }))
                    .await?,
            ),
            Request::GetDomains => Response::Domains(orchestrator.browser().domain_list().await),
            Request::GetBlockedDomains => Response::Blocked(self.blocked_domains().await?),
            Request::GetStatus => Response::Status(orchestrator.current_policy_status().await?),
            Request::SyncPolicyStates => {
                Response::Toggles(orchestrator.sync_policy_states().await?)
            }
            Request::ResetAllPolicies => {
                Response::Reset(orchestrator.reset_all_policies().await?)
            }
            Request::ApplyPolicy { kind, settings } => {
                Response::Outcome(orchestrator.apply_policy(&kind, &settings).await?)
            }
            Request::CheckPrivileges => Response::Privileges(PrivilegeReport {
                is_elevated: orchestrator.check_privileges().await,
            }),
            Request::GetBrowserStatus => Response::Browsers(orchestrator.browser_status().await),
        };
        Ok(response)
    }

    /// Enabling re-applies the domains stored in settings.
    async fn toggle_whitelist(&self, enabled: bool) -> PolicyResult<PolicyOutcome> {
        let domains = if enabled {
            let settings = self.orchestrator.store().settings().await.map_err(|err| {
                PolicyError::new(
                    ErrorCode::PolicyApplicationError,
                    "Failed to read whitelisted domains from settings",
                )
                .with_details(format!("{err:#}"))
                .recoverable(true)
            })?;
            if settings.whitelisted_domains.is_empty() {
                return Err(PolicyError::invalid_settings(
                    "No whitelisted domains configured; add a domain first",
                ));
            }
            settings.whitelisted_domains
        } else {
            Vec::new()
        };
        self.orchestrator
            .apply(PolicyRequest::Whitelist(WhitelistSettings { enabled, domains }))
            .await
    }

    async fn blocked_domains(&self) -> PolicyResult<BlockedDomains> {
        let settings = self.orchestrator.store().settings().await.map_err(|err| {
            PolicyError::new(
                ErrorCode::StatusRetrievalError,
                "Failed to read website blocking state",
            )
            .with_details(format!("{err:#}"))
            .recoverable(true)
        })?;
        Ok(if settings.website_block_enabled {
            BlockedDomains {
                domains: vec!["*".to_string()],
                description: Some("All websites are blocked".to_string()),
            }
        } else {
            BlockedDomains {
                domains: Vec::new(),
                description: None,
            }
        })
    }
}
