//! In-process registry hive backend.
//!
//! Backs the simulated mode (optionally persisted to a JSON file so state
//! survives between CLI invocations) and doubles as the test backend: every
//! call is recorded and failures can be injected per operation or per key.

use crate::{PolicyBackend, PolicyTarget, PolicyValue};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;
use warden_common::paths::write_atomic;

/// Registry-like tree, keyed by full key path (case-insensitive).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryHive {
    keys: BTreeMap<String, BTreeMap<String, PolicyValue>>,
}

impl RegistryHive {
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) if raw.trim().is_empty() => Ok(Self::default()),
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse simulated hive {:?}", path)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(anyhow!("Failed to read simulated hive {:?}: {}", path, err)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(self)
            .with_context(|| format!("failed to serialize {}", path.display()))?;
        write_atomic(path, &body)
    }

    pub fn key_exists(&self, path: &str) -> bool {
        self.keys.contains_key(&normalize(path))
    }

    pub fn values(&self, path: &str) -> Option<&BTreeMap<String, PolicyValue>> {
        self.keys.get(&normalize(path))
    }

    fn ensure_key(&mut self, path: &str) {
        self.keys.entry(normalize(path)).or_default();
    }

    fn set_value(&mut self, path: &str, name: &str, value: PolicyValue) -> Result<()> {
        let values = self
            .keys
            .get_mut(&normalize(path))
            .ok_or_else(|| {
                anyhow!(
                    "Cannot find path '{}' because it does not exist (item not found)",
                    path
                )
            })?;
        values.insert(name.to_string(), value);
        Ok(())
    }

    fn delete_key(&mut self, path: &str) {
        let root = normalize(path);
        let prefix = format!("{root}\\");
        self.keys
            .retain(|key, _| key != &root && !key.starts_with(&prefix));
    }
}

fn normalize(path: &str) -> String {
    path.trim_end_matches('\\').to_ascii_lowercase()
}

/// Hive shared by every backend of one process, with an optional file copy.
#[derive(Clone, Debug, Default)]
pub struct SharedHive {
    inner: Arc<Mutex<RegistryHive>>,
    persist_to: Option<PathBuf>,
}

impl SharedHive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the hive from `path` (missing file = empty) and write every
    /// mutation back to it.
    pub fn persistent(path: &Path) -> Result<Self> {
        let hive = RegistryHive::load(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(hive)),
            persist_to: Some(path.to_path_buf()),
        })
    }

    pub fn snapshot(&self) -> Result<RegistryHive> {
        let hive = self
            .inner
            .lock()
            .map_err(|e| anyhow!("Failed to acquire hive lock: {}", e))?;
        Ok(hive.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&RegistryHive) -> T) -> Result<T> {
        let hive = self
            .inner
            .lock()
            .map_err(|e| anyhow!("Failed to acquire hive lock: {}", e))?;
        Ok(f(&hive))
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut RegistryHive) -> Result<T>) -> Result<T> {
        let mut hive = self
            .inner
            .lock()
            .map_err(|e| anyhow!("Failed to acquire hive lock: {}", e))?;
        let out = f(&mut hive)?;
        if let Some(path) = &self.persist_to {
            hive.save(path)?;
        }
        Ok(out)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendOp {
    EnsureKey,
    SetValue,
    GetValue,
    ListValues,
    DeleteKey,
}

impl BackendOp {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::EnsureKey | Self::SetValue | Self::DeleteKey)
    }
}

/// One recorded backend invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendCall {
    pub op: BackendOp,
    pub key: String,
    pub name: Option<String>,
}

/// An injected failure; `key: None` matches every key and
/// `remaining: None` never runs out.
struct Failure {
    op: BackendOp,
    key: Option<String>,
    remaining: Option<usize>,
    message: String,
}

impl Failure {
    fn matches(&self, op: BackendOp, key: &str) -> bool {
        self.op == op
            && self.remaining != Some(0)
            && self
                .key
                .as_deref()
                .map_or(true, |wanted| wanted.eq_ignore_ascii_case(key))
    }
}

pub struct MemoryBackend {
    target: PolicyTarget,
    hive: SharedHive,
    calls: Mutex<Vec<BackendCall>>,
    failures: Mutex<Vec<Failure>>,
}

impl MemoryBackend {
    pub fn new(target: PolicyTarget) -> Self {
        Self::with_hive(target, SharedHive::new())
    }

    pub fn with_hive(target: PolicyTarget, hive: SharedHive) -> Self {
        Self {
            target,
            hive,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn hive(&self) -> &SharedHive {
        &self.hive
    }

    /// Make every subsequent `op` fail with `message` until cleared.
    pub fn fail_on(&self, op: BackendOp, message: impl Into<String>) {
        self.inject(Failure {
            op,
            key: None,
            remaining: None,
            message: message.into(),
        });
    }

    /// Make the next `times` calls of `op` on `key` fail with `message`.
    /// Other keys, and later calls on `key`, behave normally.
    pub fn fail_on_key(
        &self,
        op: BackendOp,
        key: &str,
        times: usize,
        message: impl Into<String>,
    ) {
        self.inject(Failure {
            op,
            key: Some(key.to_string()),
            remaining: Some(times),
            message: message.into(),
        });
    }

    fn inject(&self, failure: Failure) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(failure);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    pub fn mutation_count(&self) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|c| c.op.is_mutation()).count())
            .unwrap_or(0)
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    /// Whether `key` currently exists below this target's root.
    pub fn has_key(&self, key: &str) -> bool {
        let path = self.target.key_path(key);
        self.hive.read(|hive| hive.key_exists(&path)).unwrap_or(false)
    }

    fn record(&self, op: BackendOp, key: &str, name: Option<&str>) -> Result<()> {
        debug!(
            target: "policy_api::memory",
            backend = %self.target.id,
            op = ?op,
            key,
            "simulated backend call"
        );
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(BackendCall {
                op,
                key: key.to_string(),
                name: name.map(str::to_string),
            });
        }
        let mut failures = self
            .failures
            .lock()
            .map_err(|e| anyhow!("Failed to acquire failure table lock: {}", e))?;
        let failure = failures
            .iter_mut()
            .find(|failure| failure.matches(op, key))
            .map(|failure| {
                if let Some(remaining) = failure.remaining.as_mut() {
                    *remaining -= 1;
                }
                failure.message.clone()
            });
        match failure {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PolicyBackend for MemoryBackend {
    fn target(&self) -> &PolicyTarget {
        &self.target
    }

    async fn ensure_key(&self, key: &str) -> Result<()> {
        self.record(BackendOp::EnsureKey, key, None)?;
        let path = self.target.key_path(key);
        self.hive.mutate(|hive| {
            hive.ensure_key(&path);
            Ok(())
        })
    }

    async fn set_value(&self, key: &str, name: &str, value: PolicyValue) -> Result<()> {
        self.record(BackendOp::SetValue, key, Some(name))?;
        let path = self.target.key_path(key);
        self.hive.mutate(|hive| hive.set_value(&path, name, value))
    }

    async fn get_value(&self, key: &str, name: &str) -> Result<Option<PolicyValue>> {
        self.record(BackendOp::GetValue, key, Some(name))?;
        let path = self.target.key_path(key);
        self.hive.read(|hive| {
            hive.values(&path)
                .and_then(|values| values.get(name))
                .cloned()
        })
    }

    async fn list_values(&self, key: &str) -> Result<Vec<(String, PolicyValue)>> {
        self.record(BackendOp::ListValues, key, None)?;
        let path = self.target.key_path(key);
        self.hive.read(|hive| {
            hive.values(&path)
                .map(|values| {
                    values
                        .iter()
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        self.record(BackendOp::DeleteKey, key, None)?;
        let path = self.target.key_path(key);
        self.hive.mutate(|hive| {
            hive.delete_key(&path);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets;

    #[tokio::test]
    async fn set_value_requires_existing_key() {
        let backend = MemoryBackend::new(targets::chrome());
        let err = backend
            .set_value("URLBlocklist", "1", PolicyValue::String("*".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("item not found"));

        backend.ensure_key("URLBlocklist").await.unwrap();
        backend
            .set_value("URLBlocklist", "1", PolicyValue::String("*".into()))
            .await
            .unwrap();
        assert_eq!(
            backend.get_value("URLBlocklist", "1").await.unwrap(),
            Some(PolicyValue::String("*".into()))
        );
    }

    #[tokio::test]
    async fn delete_key_is_recursive_and_idempotent() {
        let backend = MemoryBackend::new(targets::firefox());
        backend.ensure_key(r"WebsiteFilter\Block").await.unwrap();
        backend.ensure_key(r"WebsiteFilter\Exceptions").await.unwrap();
        backend.delete_key("WebsiteFilter").await.unwrap();
        assert!(!backend.has_key(r"WebsiteFilter\Block"));
        assert!(!backend.has_key(r"WebsiteFilter\Exceptions"));
        backend.delete_key("WebsiteFilter").await.unwrap();
    }

    #[tokio::test]
    async fn absent_keys_read_as_empty() {
        let backend = MemoryBackend::new(targets::removable_storage());
        assert_eq!(backend.get_value("", "WriteProtect").await.unwrap(), None);
        assert!(backend.list_values("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_recorded_and_returned() {
        let backend = MemoryBackend::new(targets::edge());
        backend.fail_on(BackendOp::EnsureKey, "Access denied");
        let err = backend.ensure_key("URLBlocklist").await.unwrap_err();
        assert_eq!(err.to_string(), "Access denied");
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.mutation_count(), 1);

        backend.clear_failures();
        backend.ensure_key("URLBlocklist").await.unwrap();
        assert!(backend.has_key("urlblocklist"));
    }

    #[tokio::test]
    async fn key_scoped_failure_runs_out() {
        let backend = MemoryBackend::new(targets::chrome());
        backend.ensure_key("URLBlocklist").await.unwrap();
        backend.ensure_key("URLAllowlist").await.unwrap();
        backend.fail_on_key(BackendOp::DeleteKey, "urlblocklist", 1, "Access is denied");

        backend.delete_key("URLAllowlist").await.unwrap();
        let err = backend.delete_key("URLBlocklist").await.unwrap_err();
        assert_eq!(err.to_string(), "Access is denied");
        assert!(backend.has_key("URLBlocklist"));

        backend.delete_key("URLBlocklist").await.unwrap();
        assert!(!backend.has_key("URLBlocklist"));
    }

    #[tokio::test]
    async fn shared_hive_is_visible_across_backends() {
        let hive = SharedHive::new();
        let a = MemoryBackend::with_hive(targets::chrome(), hive.clone());
        let b = MemoryBackend::with_hive(targets::chrome(), hive.clone());
        a.ensure_key("URLAllowlist").await.unwrap();
        a.set_value("URLAllowlist", "1", PolicyValue::String("example.com".into()))
            .await
            .unwrap();
        let values = b.list_values("URLAllowlist").await.unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(b.call_count(), 1);
    }

    #[tokio::test]
    async fn persistent_hive_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.json");
        {
            let backend = MemoryBackend::with_hive(
                targets::removable_storage(),
                SharedHive::persistent(&path).unwrap(),
            );
            backend.ensure_key("").await.unwrap();
            backend
                .set_value("", "WriteProtect", PolicyValue::Dword(1))
                .await
                .unwrap();
        }
        let reloaded = MemoryBackend::with_hive(
            targets::removable_storage(),
            SharedHive::persistent(&path).unwrap(),
        );
        assert_eq!(
            reloaded.get_value("", "WriteProtect").await.unwrap(),
            Some(PolicyValue::Dword(1))
        );
    }
}
