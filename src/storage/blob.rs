//! Filesystem-backed blob store for downloadable reports

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use super::{BlobDescriptor, BlobStore};

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a blob name below the store root, refusing names that escape it
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            anyhow::bail!("Invalid blob name: {name}");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upsert(&self, blob: &BlobDescriptor, data: &[u8]) -> Result<()> {
        let path = self.path_for(&blob.name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write blob: {}", path.display()))?;

        tracing::debug!(blob = %blob.name, bytes = blob.length, "Stored report blob");
        Ok(())
    }
}
