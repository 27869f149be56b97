use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;
use warden_broker::Request;
use warden_common::{PolicyError, PolicyResult};

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about = "Removable drive and browser URL policy control", long_about = None)]
pub struct Cli {
    /// Config file (defaults to $WARDEN_HOME/config.yaml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Use the simulated backend regardless of configuration
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Only write logs to the log file
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Pretty-print the JSON result
    #[arg(long, global = true)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn enabled(self) -> bool {
        self == Self::On
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Block or allow writes to removable drives
    ToggleDriveBlock { state: Switch },
    /// Block or unblock every website in all browsers
    ToggleWebsiteBlock { state: Switch },
    /// Enable the whitelist from saved domains, or disable it
    ToggleWhitelist { state: Switch },
    /// Add a domain to the whitelist
    AddDomain { domain: String },
    /// Remove a domain from the whitelist
    RemoveDomain { domain: String },
    /// List whitelisted domains
    #[command(visible_alias = "get-whitelisted-domains")]
    GetDomains,
    /// List blocked domains
    GetBlockedDomains,
    /// Show current policy status
    GetStatus,
    /// Re-read system state into the saved toggles
    #[command(visible_alias = "sync")]
    SyncPolicyStates,
    /// Return every policy to its permissive state
    #[command(visible_alias = "reset")]
    ResetAllPolicies,
    /// Apply a policy of KIND with JSON settings
    ApplyPolicy(ApplyPolicyArgs),
    /// Report whether the process is elevated
    CheckPrivileges,
    /// Show per-browser filtering state
    GetBrowserStatus,
    /// Inspect configuration
    Config(ConfigCmd),
}

#[derive(Args, Debug)]
pub struct ApplyPolicyArgs {
    /// drive, browser, whitelist or domain
    pub kind: String,
    /// Settings object, e.g. '{"blockWriteAccess": true}'
    pub settings: String,
}

#[derive(Args, Debug)]
pub struct ConfigCmd {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective config (YAML by default)
    Show {
        #[arg(long)]
        json: bool,
    },
}

impl Command {
    /// The service request for this command; `None` for local commands.
    pub fn request(&self) -> Option<PolicyResult<Request>> {
        let request = match self {
            Self::ToggleDriveBlock { state } => Request::ToggleDriveBlock {
                enabled: state.enabled(),
            },
            Self::ToggleWebsiteBlock { state } => Request::ToggleWebsiteBlock {
                enabled: state.enabled(),
            },
            Self::ToggleWhitelist { state } => Request::ToggleWhitelist {
                enabled: state.enabled(),
            },
            Self::AddDomain { domain } => Request::AddDomain {
                domain: domain.clone(),
            },
            Self::RemoveDomain { domain } => Request::RemoveDomain {
                domain: domain.clone(),
            },
            Self::GetDomains => Request::GetDomains,
            Self::GetBlockedDomains => Request::GetBlockedDomains,
            Self::GetStatus => Request::GetStatus,
            Self::SyncPolicyStates => Request::SyncPolicyStates,
            Self::ResetAllPolicies => Request::ResetAllPolicies,
            Self::ApplyPolicy(args) => return Some(args.request()),
            Self::CheckPrivileges => Request::CheckPrivileges,
            Self::GetBrowserStatus => Request::GetBrowserStatus,
            Self::Config(_) => return None,
        };
        Some(Ok(request))
    }
}

impl ApplyPolicyArgs {
    fn request(&self) -> PolicyResult<Request> {
        let settings: Value = serde_json::from_str(&self.settings).map_err(|err| {
            PolicyError::invalid_settings("Policy settings must be a JSON object")
                .with_details(err.to_string())
        })?;
        Ok(Request::ApplyPolicy {
            kind: self.kind.clone(),
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use warden_common::ErrorCode;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommands_use_operation_names() {
        let cli =
            Cli::try_parse_from(["warden", "--simulate", "toggle-drive-block", "on"]).unwrap();
        assert!(cli.simulate);
        assert_eq!(
            cli.command.request().unwrap().unwrap(),
            Request::ToggleDriveBlock { enabled: true }
        );

        let cli = Cli::try_parse_from(["warden", "get-whitelisted-domains"]).unwrap();
        assert_eq!(cli.command.request().unwrap().unwrap(), Request::GetDomains);
    }

    #[test]
    fn apply_policy_requires_json_settings() {
        let cli = Cli::try_parse_from(["warden", "apply-policy", "drive", "{not json"]).unwrap();
        let err = cli.command.request().unwrap().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidSettings);

        let cli = Cli::try_parse_from([
            "warden",
            "apply-policy",
            "drive",
            r#"{"blockWriteAccess": false}"#,
        ])
        .unwrap();
        assert!(matches!(
            cli.command.request().unwrap().unwrap(),
            Request::ApplyPolicy { .. }
        ));
    }

    #[test]
    fn config_show_is_local() {
        let cli = Cli::try_parse_from(["warden", "config", "show", "--json"]).unwrap();
        assert!(cli.command.request().is_none());
    }
}
