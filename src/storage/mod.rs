//! Artifact persistence.
//!
//! This module defines the interface for persisting and retrieving the
//! artifacts produced by the batch stages: the cleaned record table, the
//! fitted vectorizer model, the coarse and final assignment tables, the label
//! table and the association rules. Each artifact is written whole, in a
//! single step, so readers never observe a partially written table.

pub mod json;

use async_trait::async_trait;
use thiserror::Error;

use crate::label::LabelTable;
use crate::models::{AssociationRule, CoarseAssignment, FinalAssignment, Record};
use crate::vectorize::TfidfModel;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Artifact could not be encoded or decoded
    #[error("Serialization error in {artifact}: {message}")]
    Serialization {
        /// Artifact name
        artifact: String,
        /// Decoder or encoder message
        message: String,
    },

    /// Artifact has not been produced yet
    #[error("Artifact not found: {0}")]
    NotFound(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Names of the persisted artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    /// Cleaned, deduplicated record table
    Records,
    /// Fitted vectorizer model
    Model,
    /// Coarse assignment table
    CoarseAssignments,
    /// Final assignment table
    FinalAssignments,
    /// Cluster label table
    Labels,
    /// Association rules
    Rules,
}

impl Artifact {
    /// File name used by directory-based stores.
    pub fn file_name(&self) -> &'static str {
        match self {
            Artifact::Records => "records.json",
            Artifact::Model => "vectorizer.json",
            Artifact::CoarseAssignments => "coarse_assignments.json",
            Artifact::FinalAssignments => "final_assignments.json",
            Artifact::Labels => "cluster_labels.json",
            Artifact::Rules => "association_rules.json",
        }
    }
}

/// Trait for artifact storage backends.
///
/// Writes replace the whole artifact. Implementations must make the new
/// content visible all at once or not at all.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Load the cleaned record table.
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if preprocessing has not run
    async fn load_records(&self) -> StorageResult<Vec<Record>>;

    /// Replace the cleaned record table.
    async fn save_records(&mut self, records: &[Record]) -> StorageResult<()>;

    /// Load the fitted vectorizer model.
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if training has not run, and
    /// `StorageError::Serialization` if the model is corrupt
    async fn load_model(&self) -> StorageResult<TfidfModel>;

    /// Replace the fitted vectorizer model.
    async fn save_model(&mut self, model: &TfidfModel) -> StorageResult<()>;

    /// Load the coarse assignment table.
    async fn load_coarse(&self) -> StorageResult<Vec<CoarseAssignment>>;

    /// Replace the coarse assignment table.
    async fn save_coarse(&mut self, rows: &[CoarseAssignment]) -> StorageResult<()>;

    /// Load the final assignment table.
    async fn load_final(&self) -> StorageResult<Vec<FinalAssignment>>;

    /// Replace the final assignment table.
    async fn save_final(&mut self, rows: &[FinalAssignment]) -> StorageResult<()>;

    /// Load the cluster label table.
    async fn load_labels(&self) -> StorageResult<LabelTable>;

    /// Replace the cluster label table.
    async fn save_labels(&mut self, labels: &LabelTable) -> StorageResult<()>;

    /// Load the association rules.
    async fn load_rules(&self) -> StorageResult<Vec<AssociationRule>>;

    /// Replace the association rules.
    async fn save_rules(&mut self, rules: &[AssociationRule]) -> StorageResult<()>;

    /// Whether an artifact has been written.
    async fn exists(&self, artifact: Artifact) -> StorageResult<bool>;
}
