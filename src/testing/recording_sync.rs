use crate::error::{AppError, Result};
use crate::sync::{SyncAdapter, SyncParameters};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// [`SyncAdapter`] that records its inputs instead of copying files.
///
/// Reports execution as required on a full push, or when local changes were
/// flagged with [`RecordingSync::mark_changed`].
#[derive(Clone, Default)]
pub struct RecordingSync {
    syncs: Arc<Mutex<Vec<SyncParameters>>>,
    contexts: Arc<Mutex<Vec<PathBuf>>>,
    changed: Arc<AtomicBool>,
    fail_context: Arc<AtomicBool>,
}

impl RecordingSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sync reports local changes
    pub fn mark_changed(&self) {
        self.changed.store(true, Ordering::SeqCst);
    }

    /// Packaging the build context fails from now on
    pub fn fail_build_context(&self) {
        self.fail_context.store(true, Ordering::SeqCst);
    }

    pub async fn syncs(&self) -> Vec<SyncParameters> {
        self.syncs.lock().await.clone()
    }

    pub async fn contexts(&self) -> Vec<PathBuf> {
        self.contexts.lock().await.clone()
    }
}

#[async_trait]
impl SyncAdapter for RecordingSync {
    async fn sync_files(&self, params: &SyncParameters) -> Result<bool> {
        self.syncs.lock().await.push(params.clone());
        let changed = self.changed.swap(false, Ordering::SeqCst);
        Ok(params.requires_full_push() || changed)
    }

    async fn build_context(&self, context_dir: &Path) -> Result<Vec<u8>> {
        self.contexts.lock().await.push(context_dir.to_path_buf());
        if self.fail_context.load(Ordering::SeqCst) {
            return Err(AppError::ValidationError(
                "no Dockerfile found in the build context".to_string(),
            ));
        }
        Ok(b"build-context".to_vec())
    }
}
