use anyhow::{anyhow, Result};
use policy_api::{
    targets, MemoryBackend, PolicyBackend, PolicyTarget, PrivilegeGate, SharedHive,
    StaticPrivilegeGate,
};
use policy_windows::{NetSessionGate, PowerShellRunner, RegistryBackend, ScriptRunner};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use warden_common::{BackendKind, WardenConfig};

/// Everything the broker needs from the outside world.
pub struct PolicyTargets {
    pub drive: Arc<dyn PolicyBackend>,
    /// Browser backends in fan-out order.
    pub browsers: Vec<Arc<dyn PolicyBackend>>,
    /// Index into `browsers` of the listing source of truth.
    pub domain_source: usize,
    pub gate: Arc<dyn PrivilegeGate>,
}

/// Resolve the configured browser names into target descriptors.
pub fn browser_targets(config: &WardenConfig) -> Result<(Vec<PolicyTarget>, usize)> {
    let mut resolved = Vec::with_capacity(config.browsers.len());
    for name in &config.browsers {
        let target = targets::browser(name)
            .ok_or_else(|| anyhow!("config: unknown browser target '{}'", name))?;
        resolved.push(target);
    }

    let source = config
        .domain_source_name()
        .ok_or_else(|| anyhow!("config: no browser targets configured"))?;
    let index = resolved
        .iter()
        .position(|target| target.id.eq_ignore_ascii_case(source.trim()))
        .or_else(|| {
            targets::browser(source)
                .and_then(|wanted| resolved.iter().position(|t| t.id == wanted.id))
        })
        .ok_or_else(|| anyhow!("config: domain_source '{}' is not configured", source))?;
    Ok((resolved, index))
}

/// Build the targets for the configured backend kind.
pub fn factory(config: &WardenConfig) -> Result<PolicyTargets> {
    config.validate()?;
    let (browsers, domain_source) = browser_targets(config)?;

    match config.backend {
        BackendKind::Simulated => {
            let hive_path = config.hive_file_path()?;
            let hive = SharedHive::persistent(&hive_path)?;
            info!(
                hive = %hive_path.display(),
                elevated = config.simulated.elevated,
                "using simulated policy backend"
            );
            Ok(PolicyTargets {
                drive: Arc::new(MemoryBackend::with_hive(
                    targets::removable_storage(),
                    hive.clone(),
                )),
                browsers: browsers
                    .into_iter()
                    .map(|target| {
                        Arc::new(MemoryBackend::with_hive(target, hive.clone()))
                            as Arc<dyn PolicyBackend>
                    })
                    .collect(),
                domain_source,
                gate: Arc::new(StaticPrivilegeGate(config.simulated.elevated)),
            })
        }
        BackendKind::Registry => {
            if !cfg!(windows) {
                return Err(anyhow!(
                    "Registry policy backend is not available on this platform; use the simulated backend"
                ));
            }
            let timeout = Duration::from_secs(config.powershell.timeout_secs);
            let runner: Arc<dyn ScriptRunner> = Arc::new(PowerShellRunner::new(
                config.powershell.program.clone(),
                timeout,
            ));
            info!(
                program = %config.powershell.program,
                browsers = browsers.len(),
                "using registry policy backend"
            );
            Ok(PolicyTargets {
                drive: Arc::new(RegistryBackend::new(
                    targets::removable_storage(),
                    runner.clone(),
                )),
                browsers: browsers
                    .into_iter()
                    .map(|target| {
                        Arc::new(RegistryBackend::new(target, runner.clone()))
                            as Arc<dyn PolicyBackend>
                    })
                    .collect(),
                domain_source,
                gate: Arc::new(NetSessionGate::new(timeout)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulated(dir: &tempfile::TempDir) -> WardenConfig {
        let mut config = WardenConfig {
            backend: BackendKind::Simulated,
            ..Default::default()
        };
        config.simulated.hive_file = Some(dir.path().join("hive.json"));
        config
    }

    #[test]
    fn default_browsers_resolve_in_order() {
        let (targets, source) = browser_targets(&WardenConfig::default()).unwrap();
        let ids: Vec<_> = targets.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["chrome", "edge", "firefox"]);
        assert_eq!(source, 0);
    }

    #[test]
    fn domain_source_can_point_at_a_later_browser() {
        let config = WardenConfig {
            browsers: vec!["chrome".into(), "firefox".into()],
            domain_source: Some("Firefox".into()),
            ..Default::default()
        };
        let (_, source) = browser_targets(&config).unwrap();
        assert_eq!(source, 1);
    }

    #[test]
    fn unknown_browser_is_rejected() {
        let config = WardenConfig {
            browsers: vec!["chrome".into(), "netscape".into()],
            ..Default::default()
        };
        let err = browser_targets(&config).unwrap_err();
        assert!(err.to_string().contains("netscape"));
    }

    #[tokio::test]
    async fn simulated_factory_shares_one_hive() {
        let dir = tempfile::tempdir().unwrap();
        let built = factory(&simulated(&dir)).unwrap();
        assert_eq!(built.browsers.len(), 3);
        assert!(built.gate.check_privileges().await);

        built.drive.ensure_key("").await.unwrap();
        assert!(dir.path().join("hive.json").exists());
    }

    #[tokio::test]
    async fn simulated_gate_follows_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = simulated(&dir);
        config.simulated.elevated = false;
        let built = factory(&config).unwrap();
        assert!(!built.gate.check_privileges().await);
    }

    #[cfg(not(windows))]
    #[test]
    fn registry_backend_needs_windows() {
        let config = WardenConfig {
            backend: BackendKind::Registry,
            ..Default::default()
        };
        assert!(factory(&config).is_err());
    }
}
