//! Local to remote file synchronisation seam

pub mod archive;

pub use archive::{build_archive, ArchiveSync, SYNC_STATE_FILE};

use crate::cluster::ComponentInfo;
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Inputs for one sync pass
#[derive(Debug, Clone)]
pub struct SyncParameters {
    /// Local source root
    pub local_path: PathBuf,
    /// Container that has the project sources mounted
    pub target: ComponentInfo,
    pub component_exists: bool,
    pub pod_changed: bool,
    /// Push everything even when nothing changed locally
    pub force: bool,
}

impl SyncParameters {
    /// Cases where the remote side must be refreshed regardless of local changes
    pub fn requires_full_push(&self) -> bool {
        !self.component_exists || self.pod_changed || self.force
    }
}

#[async_trait]
pub trait SyncAdapter: Send + Sync {
    /// Push changed files; returns whether commands must be (re)executed
    async fn sync_files(&self, params: &SyncParameters) -> Result<bool>;

    /// Package the full source tree as a tar build context
    async fn build_context(&self, context_dir: &Path) -> Result<Vec<u8>>;
}
