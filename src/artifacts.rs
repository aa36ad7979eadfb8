//! Write-and-return-path persistence for reports and bundle artifacts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::paths::resolve_under;

/// Persists a blob and returns where it landed.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// `relative` is resolved under the store's root before any write.
    async fn write(&self, relative: &Path, contents: &[u8]) -> Result<PathBuf>;
}

/// Filesystem store rooted at a directory; parents are created on demand.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write(&self, relative: &Path, contents: &[u8]) -> Result<PathBuf> {
        let target = resolve_under(&self.root, relative)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, contents).await?;
        debug!(path = %target.display(), bytes = contents.len(), "artifact written");
        Ok(target)
    }
}
