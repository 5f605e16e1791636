use crate::cluster::Resource;
use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Local copy of the objects returned by the last deploy
pub struct ManifestMirror {
    path: PathBuf,
    file: File,
    written: bool,
}

impl ManifestMirror {
    /// Create or truncate the mirror file
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(path).await.map_err(|e| {
            AppError::IoError(format!(
                "unable to create the local manifest file {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            written: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&mut self, resource: &Resource) -> Result<()> {
        let mut chunk = String::new();
        if self.written {
            chunk.push_str("---\n");
        }
        chunk.push_str(&resource.to_yaml()?);

        self.file.write_all(chunk.as_bytes()).await.map_err(|e| {
            AppError::IoError(format!("unable to write to local manifest file: {}", e))
        })?;
        self.written = true;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<()> {
        self.file.flush().await?;
        Ok(())
    }
}
