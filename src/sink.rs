//! Artifact sinks: where finished task text is handed off.
//!
//! The runner only guarantees the text is final before `write` is called;
//! durability is the sink's business.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("artifact path {0} escapes the output directory")]
    InvalidPath(PathBuf),

    #[error("failed to write artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Receiver for completed task artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn write(&self, artifact_path: &Path, text: &str) -> Result<(), SinkError>;
}

/// Writes artifacts below a root directory.
///
/// Each file is written to a temporary sibling and renamed into place, so a
/// reader never sees a half-written report.
#[derive(Debug, Clone)]
pub struct FsSink {
    root: PathBuf,
}

impl FsSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative artifact path under the root.
    fn resolve(&self, artifact_path: &Path) -> Result<PathBuf, SinkError> {
        let escapes = artifact_path.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(SinkError::InvalidPath(artifact_path.to_path_buf()));
        }
        Ok(self.root.join(artifact_path))
    }
}

#[async_trait]
impl ArtifactSink for FsSink {
    async fn write(&self, artifact_path: &Path, text: &str) -> Result<(), SinkError> {
        let path = self.resolve(artifact_path)?;
        let io_err = |source| SinkError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        write_atomic(&path, text.as_bytes()).await.map_err(io_err)?;

        tracing::debug!(path = %path.display(), bytes = text.len(), "Artifact written");
        Ok(())
    }
}

/// Write `contents` to a `<file name>.tmp` sibling and rename it over `path`.
///
/// The temporary file is removed if either step fails.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let result = match tokio::fs::write(&tmp_path, contents).await {
        Ok(()) => tokio::fs::rename(&tmp_path, path).await,
        Err(e) => Err(e),
    };
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp_path).await;
    }
    result
}

/// Keeps artifacts in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    artifacts: Mutex<BTreeMap<PathBuf, String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, artifact_path: impl AsRef<Path>) -> Option<String> {
        self.artifacts
            .lock()
            .await
            .get(artifact_path.as_ref())
            .cloned()
    }

    pub async fn paths(&self) -> Vec<PathBuf> {
        self.artifacts.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn write(&self, artifact_path: &Path, text: &str) -> Result<(), SinkError> {
        self.artifacts
            .lock()
            .await
            .insert(artifact_path.to_path_buf(), text.to_string());
        Ok(())
    }
}
