//! `config.yaml` model with environment overrides.

use crate::paths;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which policy backend the targets are built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Live registry mutations through PowerShell.
    Registry,
    /// File-persisted registry hive; no system changes.
    Simulated,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Simulated => "simulated",
        }
    }

    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::Registry
        } else {
            Self::Simulated
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "registry" => Ok(Self::Registry),
            "simulated" | "simulate" => Ok(Self::Simulated),
            other => Err(format!(
                "invalid backend: {} (expected registry or simulated)",
                other
            )),
        }
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::platform_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PowerShellConfig {
    pub program: String,
    pub timeout_secs: u64,
}

impl Default for PowerShellConfig {
    fn default() -> Self {
        Self {
            program: "powershell.exe".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SimulatedConfig {
    pub hive_file: Option<PathBuf>,
    /// Answer given by the simulated privilege gate.
    pub elevated: bool,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            hive_file: None,
            elevated: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WardenConfig {
    pub backend: BackendKind,
    /// Browser targets, in fan-out order.
    pub browsers: Vec<String>,
    /// Browser whose allowlist is read when listing domains.
    pub domain_source: Option<String>,
    pub powershell: PowerShellConfig,
    pub simulated: SimulatedConfig,
    pub state_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::platform_default(),
            browsers: vec!["chrome".into(), "edge".into(), "firefox".into()],
            domain_source: None,
            powershell: PowerShellConfig::default(),
            simulated: SimulatedConfig::default(),
            state_file: None,
            log_dir: None,
        }
    }
}

impl WardenConfig {
    /// Load from `path`, or from `<home>/config.yaml` when no path is given.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (paths::config_file()?, false),
        };

        let config = match std::fs::read_to_string(&path) {
            Ok(raw) => Self::parse_yaml(&raw)
                .with_context(|| format!("Failed to parse config from {:?}", path))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
                Self::default()
            }
            Err(err) => {
                return Err(anyhow!("Failed to read config from {:?}: {}", path, err));
            }
        };
        Ok(config)
    }

    pub fn parse_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw)?;
        Ok(config)
    }

    /// Apply `WARDEN_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("WARDEN_BACKEND") {
            self.backend = raw.parse().map_err(|err: String| anyhow!(err))?;
        }
        if let Some(raw) = lookup("WARDEN_SIMULATE_ELEVATED") {
            self.simulated.elevated = parse_flag(&raw)
                .ok_or_else(|| anyhow!("invalid WARDEN_SIMULATE_ELEVATED: {}", raw))?;
        }
        if let Some(raw) = lookup("WARDEN_POWERSHELL") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                self.powershell.program = trimmed.to_string();
            }
        }
        if let Some(raw) = lookup("WARDEN_COMMAND_TIMEOUT_SECS") {
            self.powershell.timeout_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid WARDEN_COMMAND_TIMEOUT_SECS: {}", raw))?;
        }
        if let Some(raw) = lookup("WARDEN_STATE_FILE") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                self.state_file = Some(PathBuf::from(trimmed));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.browsers.is_empty() {
            bail!("config: browsers must name at least one browser target");
        }
        let mut seen = std::collections::HashSet::new();
        for name in &self.browsers {
            if !seen.insert(name.to_ascii_lowercase()) {
                bail!("config: browser '{}' listed more than once", name);
            }
        }
        if let Some(source) = &self.domain_source {
            if !self
                .browsers
                .iter()
                .any(|name| name.eq_ignore_ascii_case(source))
            {
                bail!(
                    "config: domain_source '{}' is not one of the configured browsers",
                    source
                );
            }
        }
        if self.powershell.timeout_secs == 0 {
            bail!("config: powershell.timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn domain_source_name(&self) -> Option<&str> {
        self.domain_source
            .as_deref()
            .or_else(|| self.browsers.first().map(String::as_str))
    }

    pub fn state_file_path(&self) -> Result<PathBuf> {
        match &self.state_file {
            Some(path) => Ok(path.clone()),
            None => paths::state_file(),
        }
    }

    pub fn hive_file_path(&self) -> Result<PathBuf> {
        match &self.simulated.hive_file {
            Some(path) => Ok(path.clone()),
            None => paths::simulated_hive_file(),
        }
    }

    pub fn log_dir_path(&self) -> Result<PathBuf> {
        match &self.log_dir {
            Some(path) => Ok(path.clone()),
            None => paths::log_dir(),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
