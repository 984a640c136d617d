//! Scoped temporary files.
//!
//! Every file the batch pipeline writes to disk is a `TempArtifact`. The file
//! is removed exactly once, when the guard is dropped, on every exit path.

use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::MediaResult;

/// A temporary file removed when dropped.
#[derive(Debug)]
pub struct TempArtifact {
    /// Role of the file in the pipeline ("input", "intermediate", "final")
    role: &'static str,
    /// Cached path, valid for the lifetime of the guard
    path: PathBuf,
    /// Owning handle; `None` only after removal
    handle: Option<TempPath>,
}

impl TempArtifact {
    /// Create an empty temporary file in `dir` with the given suffix.
    pub fn create(dir: impl AsRef<Path>, role: &'static str, suffix: &str) -> MediaResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let handle = tempfile::Builder::new()
            .prefix(&format!("vblur-{}-", role))
            .suffix(suffix)
            .tempfile_in(dir)?
            .into_temp_path();

        let path = handle.to_path_buf();
        debug!(role, path = %path.display(), "Created temp artifact");

        Ok(Self {
            role,
            path,
            handle: Some(handle),
        })
    }

    /// Create the artifact and fill it with `bytes`.
    pub async fn create_with(
        dir: impl AsRef<Path>,
        role: &'static str,
        suffix: &str,
        bytes: &[u8],
    ) -> MediaResult<Self> {
        let artifact = Self::create(dir, role, suffix)?;
        tokio::fs::write(artifact.path(), bytes).await?;
        Ok(artifact)
    }

    /// Path of the file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Role of the file in the pipeline.
    pub fn role(&self) -> &'static str {
        self.role
    }

    /// Current size in bytes, or `None` if the file is missing.
    pub async fn size(&self) -> Option<u64> {
        tokio::fs::metadata(&self.path).await.ok().map(|m| m.len())
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        match handle.close() {
            Ok(()) => debug!(role = self.role, path = %self.path.display(), "Removed temp artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(role = self.role, path = %self.path.display(), "Temp artifact already gone")
            }
            Err(e) => warn!(
                role = self.role,
                path = %self.path.display(),
                "Failed to remove temp artifact: {}",
                e
            ),
        }
    }
}
