use super::{SyncAdapter, SyncParameters};
use crate::cluster::ClusterClient;
use crate::config::LOCAL_STATE_DIR;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Digest of the last pushed tree, relative to the context directory
pub const SYNC_STATE_FILE: &str = "sync-digest";

const SKIPPED_DIRS: [&str; 2] = [".git", LOCAL_STATE_DIR];

/// Whole-tree sync: tars the context and unpacks it in the target container
/// whenever its content digest differs from the last pushed one.
pub struct ArchiveSync {
    cluster: Arc<dyn ClusterClient>,
}

impl ArchiveSync {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }

    fn state_path(context_dir: &Path) -> PathBuf {
        context_dir.join(LOCAL_STATE_DIR).join(SYNC_STATE_FILE)
    }

    async fn stored_digest(context_dir: &Path) -> Option<String> {
        tokio::fs::read_to_string(Self::state_path(context_dir))
            .await
            .ok()
            .map(|s| s.trim().to_string())
    }

    async fn store_digest(context_dir: &Path, digest: &str) -> Result<()> {
        let path = Self::state_path(context_dir);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, digest).await?;
        Ok(())
    }
}

fn is_skipped(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .ok()
        .and_then(|rel| rel.components().next())
        .map(|first| SKIPPED_DIRS.iter().any(|s| first.as_os_str() == *s))
        .unwrap_or(false)
}

/// Files under `root` in a stable order, minus VCS and engine state
fn source_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(AppError::SyncError(format!(
            "context directory {} does not exist",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(root, e.path()))
    {
        let entry = entry.map_err(|e| AppError::SyncError(format!("walking {}: {}", root.display(), e)))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn tree_digest(root: &Path, files: &[PathBuf]) -> Result<String> {
    let mut hasher = Sha256::new();
    for file in files {
        let relative = file.strip_prefix(root).unwrap_or(file);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(std::fs::read(file)?);
        hasher.update([0u8]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

fn tar_files(root: &Path, files: &[PathBuf]) -> Result<Vec<u8>> {
    let mut tar_data = Vec::new();
    {
        let mut tar = tar::Builder::new(&mut tar_data);
        for file in files {
            let relative = file.strip_prefix(root).unwrap_or(file);
            tar.append_path_with_name(file, relative).map_err(|e| {
                AppError::SyncError(format!("Failed to add {} to archive: {}", relative.display(), e))
            })?;
        }
        tar.finish()
            .map_err(|e| AppError::SyncError(format!("Failed to finish tar archive: {}", e)))?;
    }
    Ok(tar_data)
}

/// Tar of the context directory; `require_dockerfile` enforces a root `Dockerfile`
pub fn build_archive(root: &Path, require_dockerfile: bool) -> Result<Vec<u8>> {
    if require_dockerfile && !root.join("Dockerfile").is_file() {
        return Err(AppError::ValidationError(format!(
            "no Dockerfile found in {}",
            root.display()
        )));
    }
    let files = source_files(root)?;
    tar_files(root, &files)
}

#[async_trait]
impl SyncAdapter for ArchiveSync {
    async fn sync_files(&self, params: &SyncParameters) -> Result<bool> {
        let root = params.local_path.clone();
        let (files, digest) = tokio::task::spawn_blocking(move || {
            let files = source_files(&root)?;
            let digest = tree_digest(&root, &files)?;
            Ok::<_, AppError>((files, digest))
        })
        .await
        .map_err(|e| AppError::SyncError(format!("sync task failed: {}", e)))??;

        let unchanged = Self::stored_digest(&params.local_path).await.as_deref() == Some(digest.as_str());
        if unchanged && !params.requires_full_push() {
            debug!("📭 No local changes to push");
            return Ok(false);
        }

        let dest = params
            .target
            .source_mount
            .clone()
            .ok_or_else(|| AppError::SyncError("target container has no source mount".to_string()))?;

        let root = params.local_path.clone();
        let archive = tokio::task::spawn_blocking(move || tar_files(&root, &files))
            .await
            .map_err(|e| AppError::SyncError(format!("sync task failed: {}", e)))??;

        info!(
            "📤 Pushing sources to {}:{}",
            params.target.pod_name, dest
        );
        self.cluster
            .extract_archive(
                &params.target.pod_name,
                &params.target.container_name,
                &dest,
                archive,
            )
            .await?;

        Self::store_digest(&params.local_path, &digest).await?;
        Ok(true)
    }

    async fn build_context(&self, context_dir: &Path) -> Result<Vec<u8>> {
        let root = context_dir.to_path_buf();
        tokio::task::spawn_blocking(move || build_archive(&root, true))
            .await
            .map_err(|e| AppError::SyncError(format!("archive task failed: {}", e)))?
    }
}
