//! Object storage
//!
//! Chart bundles and job artifacts are addressed by deterministic keys.

use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Key of a service's bundle at a given revision
pub fn service_bundle_key(project: &str, service: &str, revision: i64) -> String {
    format!("{}/{}/{}-{}.tar.gz", project, service, service, revision)
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;

    async fn put(&self, key: &str, data: &[u8]) -> anyhow::Result<()>;

    /// Keys under a prefix, sorted
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>>;

    /// Copies an object to a local file, creating parent directories
    async fn download(&self, key: &str, dest: &Path) -> anyhow::Result<()> {
        let data = self.get(key).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(dest, data)
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))
    }
}

/// Storage rooted at a local directory
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, key: &str) -> anyhow::Result<PathBuf> {
        if key.split('/').any(|segment| segment == "..") {
            anyhow::bail!("invalid object key: {}", key);
        }
        Ok(self.root.join(key.trim_start_matches('/')))
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.path_of(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read object {}", key))
    }

    async fn put(&self, key: &str, data: &[u8]) -> anyhow::Result<()> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write object {}", key))
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative.to_string_lossy().replace('\\', "/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
