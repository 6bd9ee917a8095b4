//! Blob store abstraction.
//!
//! Source files are read from here during ingestion, and generated media
//! (podcast audio) is written back. The store is a plain key-value bytes API;
//! the real object-storage service is an external collaborator.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn download(&self, path: &str) -> Result<Vec<u8>>;

    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    async fn get_metadata(&self, path: &str) -> Result<HashMap<String, String>>;

    async fn set_metadata(&self, path: &str, metadata: HashMap<String, String>) -> Result<()>;
}

/// Filesystem-backed blob store with JSON sidecar metadata files.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a storage path under the root, rejecting traversal.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            anyhow::bail!("invalid storage path: {}", path);
        }
        Ok(self.root.join(rel))
    }

    fn meta_path(&self, path: &str) -> Result<PathBuf> {
        let full = self.resolve(path)?;
        let mut name = full
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        name.push_str(".meta.json");
        Ok(full.with_file_name(name))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .with_context(|| format!("failed to read blob: {}", path))
    }

    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
        mut metadata: HashMap<String, String>,
    ) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .with_context(|| format!("failed to write blob: {}", path))?;

        metadata.insert("content_type".to_string(), content_type.to_string());
        self.set_metadata(path, metadata).await
    }

    async fn get_metadata(&self, path: &str) -> Result<HashMap<String, String>> {
        let meta = self.meta_path(path)?;
        match tokio::fs::read(&meta).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_metadata(&self, path: &str, metadata: HashMap<String, String>) -> Result<()> {
        let meta = self.meta_path(path)?;
        if let Some(parent) = meta.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&meta, serde_json::to_vec_pretty(&metadata)?).await?;
        Ok(())
    }
}
