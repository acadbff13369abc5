//! JSON-directory artifact store.
//!
//! Every artifact is one pretty-printed JSON file inside a data directory.
//! Writes go to a hidden temporary sibling first and are then renamed over
//! the target, which is atomic on the same filesystem.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::{Artifact, ArtifactStore, StorageError, StorageResult};
use crate::label::LabelTable;
use crate::models::{AssociationRule, CoarseAssignment, FinalAssignment, Record};
use crate::vectorize::TfidfModel;

/// Artifact store backed by a directory of JSON files.
#[derive(Debug, Clone)]
pub struct JsonArtifactStore {
    dir: PathBuf,
}

impl JsonArtifactStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns `StorageError::Io` if the directory cannot be created
    pub async fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| io_error(&dir, e))?;
        debug!(dir = %dir.display(), "Opened artifact store");
        Ok(Self { dir })
    }

    /// Directory holding the artifacts.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of an artifact.
    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.dir.join(artifact.file_name())
    }

    async fn read<T: DeserializeOwned>(&self, artifact: Artifact) -> StorageResult<T> {
        let path = self.path(artifact);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization {
            artifact: artifact.file_name().to_string(),
            message: e.to_string(),
        })
    }

    async fn write<T: Serialize + ?Sized>(&self, artifact: Artifact, value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Serialization {
            artifact: artifact.file_name().to_string(),
            message: e.to_string(),
        })?;
        let path = self.path(artifact);
        write_atomic(&path, &bytes).await?;
        info!(artifact = artifact.file_name(), bytes = bytes.len(), "Wrote artifact");
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for JsonArtifactStore {
    async fn load_records(&self) -> StorageResult<Vec<Record>> {
        self.read(Artifact::Records).await
    }

    async fn save_records(&mut self, records: &[Record]) -> StorageResult<()> {
        self.write(Artifact::Records, records).await
    }

    async fn load_model(&self) -> StorageResult<TfidfModel> {
        self.read(Artifact::Model).await
    }

    async fn save_model(&mut self, model: &TfidfModel) -> StorageResult<()> {
        self.write(Artifact::Model, model).await
    }

    async fn load_coarse(&self) -> StorageResult<Vec<CoarseAssignment>> {
        self.read(Artifact::CoarseAssignments).await
    }

    async fn save_coarse(&mut self, rows: &[CoarseAssignment]) -> StorageResult<()> {
        self.write(Artifact::CoarseAssignments, rows).await
    }

    async fn load_final(&self) -> StorageResult<Vec<FinalAssignment>> {
        self.read(Artifact::FinalAssignments).await
    }

    async fn save_final(&mut self, rows: &[FinalAssignment]) -> StorageResult<()> {
        self.write(Artifact::FinalAssignments, rows).await
    }

    async fn load_labels(&self) -> StorageResult<LabelTable> {
        self.read(Artifact::Labels).await
    }

    async fn save_labels(&mut self, labels: &LabelTable) -> StorageResult<()> {
        self.write(Artifact::Labels, labels).await
    }

    async fn load_rules(&self) -> StorageResult<Vec<AssociationRule>> {
        self.read(Artifact::Rules).await
    }

    async fn save_rules(&mut self, rules: &[AssociationRule]) -> StorageResult<()> {
        self.write(Artifact::Rules, rules).await
    }

    async fn exists(&self, artifact: Artifact) -> StorageResult<bool> {
        let path = self.path(artifact);
        tokio::fs::try_exists(&path).await.map_err(|e| io_error(&path, e))
    }
}

/// Read a raw record list (JSON array of `{link, title, abstract}`).
///
/// # Errors
/// Returns `StorageError::NotFound` if the file does not exist and
/// `StorageError::Serialization` if it is not a record array
pub async fn read_records_file(path: impl AsRef<Path>) -> StorageResult<Vec<Record>> {
    let path = path.as_ref();
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StorageError::NotFound(path.display().to_string()));
        }
        Err(e) => return Err(io_error(path, e)),
    };
    serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization {
        artifact: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Write `bytes` to `path` through a temporary sibling and a rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    tokio::fs::write(&tmp, bytes).await.map_err(|e| io_error(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error(path, e));
    }
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}
