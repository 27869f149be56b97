use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const WARDEN_DIR_NAME: &str = ".warden";

pub fn warden_home() -> Result<PathBuf> {
    if let Ok(override_home) = std::env::var("WARDEN_HOME") {
        let trimmed = override_home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("No home directory found"))?
        .join(WARDEN_DIR_NAME))
}

pub fn config_file() -> Result<PathBuf> {
    Ok(warden_home()?.join("config.yaml"))
}

pub fn state_file() -> Result<PathBuf> {
    Ok(warden_home()?.join("state.json"))
}

pub fn simulated_hive_file() -> Result<PathBuf> {
    Ok(warden_home()?.join("simulated-hive.json"))
}

pub fn log_dir() -> Result<PathBuf> {
    Ok(warden_home()?.join("logs"))
}

/// Replace `path` with `body` via a temp file in the same directory, so
/// readers never see a partial write.
pub fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path {} has no parent", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file near {}", path.display()))?;
    tmp.write_all(body)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err.error))?;
    Ok(())
}
