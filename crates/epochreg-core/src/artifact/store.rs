use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;

use super::names::{Artifact, ProductKind, WorkspaceLayout};

/// File-existence memoization for stage artifacts.
///
/// Every idempotence check and every clobber removal goes through this.
pub trait ArtifactStore: Send + Sync {
    fn layout(&self) -> &WorkspaceLayout;

    fn path_for(&self, artifact: &Artifact, kind: ProductKind) -> PathBuf {
        self.layout().path(artifact, kind)
    }

    /// Whether the canonical product of `artifact` exists.
    fn exists(&self, artifact: &Artifact) -> bool;

    /// Remove every product of `artifact` that exists. Returns the
    /// removed paths.
    fn invalidate(&self, artifact: &Artifact) -> Result<Vec<PathBuf>>;
}

/// `ArtifactStore` over the local file system.
#[derive(Clone, Debug)]
pub struct FsArtifactStore {
    layout: WorkspaceLayout,
}

impl FsArtifactStore {
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self { layout }
    }
}

impl ArtifactStore for FsArtifactStore {
    fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    fn exists(&self, artifact: &Artifact) -> bool {
        self.path_for(artifact, artifact.canonical_kind()).is_file()
    }

    fn invalidate(&self, artifact: &Artifact) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for &kind in artifact.kinds() {
            let path = self.path_for(artifact, kind);
            if path.is_file() {
                fs::remove_file(&path)?;
                debug!(path = %path.display(), "Removed stale artifact");
                removed.push(path);
            }
        }
        Ok(removed)
    }
}
