use crate::state::write_atomic;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Destination for generated vault files. Paths are vault-relative.
#[async_trait]
pub trait VaultWriter: Send + Sync {
    async fn write(&self, rel_path: &str, bytes: Vec<u8>) -> Result<()>;
    async fn ensure_folder(&self, rel_path: &str) -> Result<()>;
}

/// Rejects absolute paths and anything that climbs out of the vault.
pub fn check_relative(rel_path: &str) -> Result<&Path> {
    let path = Path::new(rel_path);
    let safe = !rel_path.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(path)
    } else {
        Err(Error::UnsafePath(rel_path.to_string()))
    }
}

/// Writes into a directory on disk, atomically per file.
pub struct FsVaultWriter {
    root: PathBuf,
    dry_run: bool,
}

impl FsVaultWriter {
    pub fn new(root: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            root: root.into(),
            dry_run,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl VaultWriter for FsVaultWriter {
    async fn write(&self, rel_path: &str, bytes: Vec<u8>) -> Result<()> {
        let target = self.root.join(check_relative(rel_path)?);
        if self.dry_run {
            debug!("[dry-run] would write {} ({} bytes)", target.display(), bytes.len());
            return Ok(());
        }
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(|e| Error::Other(format!("write task failed: {}", e)))?
    }

    async fn ensure_folder(&self, rel_path: &str) -> Result<()> {
        let target = self.root.join(check_relative(rel_path)?);
        if self.dry_run {
            debug!("[dry-run] would create {}", target.display());
            return Ok(());
        }
        tokio::fs::create_dir_all(&target).await?;
        Ok(())
    }
}

/// Keeps written files in memory; handy for dry inspection and tests.
#[derive(Default)]
pub struct MemoryVaultWriter {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    folders: Mutex<Vec<String>>,
    writes: Mutex<usize>,
}

impl MemoryVaultWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(&self, rel_path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(rel_path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn paths(&self) -> Vec<String> {
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn folders(&self) -> Vec<String> {
        self.folders.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of `write` calls so far, including overwrites.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl VaultWriter for MemoryVaultWriter {
    async fn write(&self, rel_path: &str, bytes: Vec<u8>) -> Result<()> {
        check_relative(rel_path)?;
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(rel_path.to_string(), bytes);
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }

    async fn ensure_folder(&self, rel_path: &str) -> Result<()> {
        check_relative(rel_path)?;
        let mut folders = self.folders.lock().unwrap_or_else(|e| e.into_inner());
        if !folders.iter().any(|f| f == rel_path) {
            folders.push(rel_path.to_string());
        }
        Ok(())
    }
}
