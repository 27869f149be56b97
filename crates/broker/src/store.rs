//! Persistent settings and toggle state.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;
use warden_common::paths::write_atomic;
use warden_common::{PersistedState, Settings, SettingsPatch, ToggleState, TogglePatch};

/// Durable key/value-like store for settings and toggles.
///
/// Updates merge into the stored record; each returns the merged result.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn settings(&self) -> Result<Settings>;
    async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings>;
    async fn toggle_states(&self) -> Result<ToggleState>;
    async fn update_toggle_states(&self, patch: TogglePatch) -> Result<ToggleState>;
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<PersistedState>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Default::default()
        }
    }

    /// Make every subsequent update fail, for exercising error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> PersistedState {
        self.state.lock().await.clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(anyhow!("state store is read-only"));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn settings(&self) -> Result<Settings> {
        Ok(self.state.lock().await.settings.clone())
    }

    async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        patch.apply_to(&mut state.settings);
        Ok(state.settings.clone())
    }

    async fn toggle_states(&self) -> Result<ToggleState> {
        Ok(self.state.lock().await.toggles.clone())
    }

    async fn update_toggle_states(&self, patch: TogglePatch) -> Result<ToggleState> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        patch.apply_to(&mut state.toggles);
        Ok(state.toggles.clone())
    }
}

/// JSON file store. A missing file reads as defaults; writes replace the
/// file atomically.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<PersistedState> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(PersistedState::default()),
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse state file {:?}", self.path)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(PersistedState::default())
            }
            Err(err) => Err(anyhow!("Failed to read state file {:?}: {}", self.path, err)),
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let path = self.path.clone();
        let body = serde_json::to_vec_pretty(state)
            .with_context(|| format!("failed to serialize {}", path.display()))?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &body))
            .await
            .context("state writer task panicked")??;
        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }

    async fn modify<T>(&self, f: impl FnOnce(&mut PersistedState) -> T) -> Result<T> {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        let out = f(&mut state);
        self.save(&state).await?;
        Ok(out)
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn settings(&self) -> Result<Settings> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.settings)
    }

    async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        self.modify(|state| {
            patch.apply_to(&mut state.settings);
            state.settings.clone()
        })
        .await
    }

    async fn toggle_states(&self) -> Result<ToggleState> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.toggles)
    }

    async fn update_toggle_states(&self, patch: TogglePatch) -> Result<ToggleState> {
        self.modify(|state| {
            patch.apply_to(&mut state.toggles);
            state.toggles.clone()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_reads_as_defaults() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert_eq!(store.settings().await.unwrap(), Settings::default());
        assert_eq!(store.toggle_states().await.unwrap(), ToggleState::default());
    }

    #[tokio::test]
    async fn updates_merge_and_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = JsonFileStore::new(&path);

        store
            .update_settings(SettingsPatch {
                whitelisted_domains: Some(vec!["example.com".into()]),
                whitelist_enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        let merged = store
            .update_settings(SettingsPatch {
                drive_block_enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(merged.whitelist_enabled);
        assert!(merged.drive_block_enabled);

        store
            .update_toggle_states(TogglePatch {
                website_block: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let reopened = JsonFileStore::new(&path);
        let settings = reopened.settings().await.unwrap();
        assert_eq!(settings.whitelisted_domains, vec!["example.com"]);
        assert!(reopened.toggle_states().await.unwrap().website_block);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(store.settings().await.is_err());
    }

    #[tokio::test]
    async fn memory_store_can_refuse_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.update_settings(SettingsPatch::default()).await.is_err());
        store.set_fail_writes(false);
        let toggles = store
            .update_toggle_states(TogglePatch {
                drive_block: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(toggles.drive_block);
        assert!(store.snapshot().await.toggles.drive_block);
    }
}
