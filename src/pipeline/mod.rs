//! Batch pipeline orchestration.
//!
//! Stages, each reading its inputs from and writing its outputs to an
//! [`ArtifactStore`]:
//!
//! 1. `preprocess` - deduplicate raw records, clean abstracts, save records
//! 2. `train` - fit the vectorizer, run the coarse pass, mine rules
//! 3. `consolidate` - re-split coarse clusters into final clusters
//! 4. `label` - derive one label per final cluster
//!
//! Every stage computes everything before its first write, so a stage that
//! fails while computing leaves the previously persisted artifacts untouched.
//! A storage failure partway through `train` is not rolled back; the model is
//! written last, so the persisted model never runs ahead of the tables it was
//! fitted with.
//!
//! ```ignore
//! let store = JsonArtifactStore::open("data/artifacts").await?;
//! let mut pipeline = Pipeline::new(store, PipelineConfig::default());
//! let raw = read_records_file("data/articles.json").await?;
//! pipeline.run(raw, |_, _| {}).await?;
//! ```

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{info, warn};

use crate::associations::{transactions, AssociationError, AssociationMiner};
use crate::config::{ConfigError, PipelineConfig};
use crate::consolidate::{ClusterConsolidator, Consolidation, ConsolidationError};
use crate::evaluate::{inertia_sweep, silhouette_score};
use crate::join::{left_outer_join, log_repeated, KeyedTable};
use crate::label::{group_members, LabelDeriver, LabelTable};
use crate::models::{CoarseAssignment, Record, UNASSIGNED};
use crate::partition::PartitionError;
use crate::preprocess::{dedup_records, preprocess, DuplicateReport};
use crate::report::render_html_report;
use crate::storage::{ArtifactStore, StorageError};
use crate::vectorize::{TextVectorizer, TfidfFitter, VectorizeError};

/// Errors that abort a pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Artifact could not be read or written
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Vectorizer fitting failed
    #[error("Vectorizer error: {0}")]
    Vectorize(#[from] VectorizeError),

    /// Coarse partitioning failed
    #[error("Partitioning error: {0}")]
    Partition(#[from] PartitionError),

    /// Consolidation failed
    #[error("Consolidation error: {0}")]
    Consolidation(#[from] ConsolidationError),

    /// Association mining failed
    #[error("Association mining error: {0}")]
    Association(#[from] AssociationError),

    /// Input data cannot be processed
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for pipeline stages.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Outcome of the preprocess stage.
#[derive(Debug, Clone)]
pub struct PreprocessSummary {
    /// Records saved
    pub records: usize,
    /// Records with an empty cleaned abstract
    pub empty_abstracts: usize,
    /// Duplicate findings
    pub duplicates: DuplicateReport,
}

/// Outcome of the train stage.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    /// Vocabulary size
    pub vocabulary: usize,
    /// Member count per coarse cluster, by id
    pub coarse_sizes: Vec<usize>,
    /// Coarse pass inertia
    pub inertia: f64,
    /// Number of rules mined
    pub rules: usize,
}

/// Outcome of the evaluate stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Mean silhouette of the coarse assignment, if defined
    pub silhouette: Option<f64>,
    /// `(k, inertia)` for every k of the configured range
    pub inertia: Vec<(usize, f64)>,
}

/// Batch pipeline over an artifact store.
pub struct Pipeline<S>
where
    S: ArtifactStore,
{
    store: S,
    config: PipelineConfig,
}

impl<S> Pipeline<S>
where
    S: ArtifactStore,
{
    /// Create a pipeline.
    pub fn new(store: S, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Deduplicate and clean raw records, then save them.
    ///
    /// Divergent duplicates are logged and reported; the first row of each
    /// key is kept.
    ///
    /// # Errors
    /// Returns `PipelineError::InvalidInput` for an empty record list
    pub async fn preprocess(&mut self, raw: Vec<Record>) -> PipelineResult<PreprocessSummary> {
        if raw.is_empty() {
            return Err(PipelineError::InvalidInput("no input records".to_string()));
        }
        let (mut records, duplicates) = dedup_records(raw);
        preprocess(&mut records);

        let empty_abstracts = records.iter().filter(|r| r.clean_abstract.is_empty()).count();
        if empty_abstracts > 0 {
            warn!(count = empty_abstracts, "Records with no usable abstract text");
        }

        self.store.save_records(&records).await?;
        info!(records = records.len(), surplus = duplicates.surplus_rows(), "Preprocess stage complete");

        Ok(PreprocessSummary {
            records: records.len(),
            empty_abstracts,
            duplicates,
        })
    }

    /// Fit the vectorizer, run the coarse pass and mine association rules.
    ///
    /// # Errors
    /// Fails if records are missing, the vocabulary is empty, the coarse pass
    /// fails or mining parameters are invalid. Nothing is written then.
    pub async fn train(&mut self) -> PipelineResult<TrainSummary> {
        self.config.validate()?;
        let records = self.store.load_records().await?;
        let texts: Vec<&str> = records.iter().map(|r| r.clean_abstract.as_str()).collect();

        let model = TfidfFitter::new(self.config.vectorizer.max_features)
            .with_ranking(self.config.vectorizer.ranking)
            .fit(&texts)?;
        let vectors = model.transform_batch(&texts);

        let fit = self.config.coarse.kmeans().fit(&vectors, self.config.coarse.k)?;
        let mut coarse_sizes = vec![0usize; self.config.coarse.k];
        let coarse: Vec<CoarseAssignment> = records
            .iter()
            .zip(fit.assignments.iter())
            .map(|(r, &c)| {
                coarse_sizes[c] += 1;
                CoarseAssignment {
                    link: r.link.clone(),
                    cluster: c as u32,
                }
            })
            .collect();
        info!(k = self.config.coarse.k, sizes = ?coarse_sizes, inertia = fit.inertia, "Coarse pass complete");

        let assoc = &self.config.associations;
        let mut miner = AssociationMiner::new(assoc.min_support, assoc.min_confidence)?;
        if let Some(max_len) = assoc.max_len {
            miner = miner.with_max_len(max_len);
        }
        let baskets: Vec<BTreeSet<usize>> = transactions(&model, &texts);
        let rules = miner.mine(&baskets, model.terms());

        self.store.save_coarse(&coarse).await?;
        self.store.save_rules(&rules).await?;
        self.store.save_model(&model).await?;

        Ok(TrainSummary {
            vocabulary: model.dimension(),
            coarse_sizes,
            inertia: fit.inertia,
            rules: rules.len(),
        })
    }

    /// Re-split coarse clusters and save the final assignment table.
    ///
    /// # Errors
    /// Any consolidation error aborts the stage before the table is written.
    pub async fn consolidate(&mut self) -> PipelineResult<Consolidation> {
        let records = self.store.load_records().await?;
        let model = self.store.load_model().await?;
        let coarse = self.store.load_coarse().await?;

        let cfg = &self.config.consolidation;
        let consolidation = ClusterConsolidator::new(&model, self.config.coarse.kmeans(), cfg.targets.clone())
            .with_start_id(cfg.start_id)
            .consolidate(&records, &coarse)?;

        self.store.save_final(&consolidation.assignments).await?;
        Ok(consolidation)
    }

    /// Derive and save one label per final cluster.
    ///
    /// `progress` is called with `(done, total)` after each cluster.
    pub async fn label<F>(&mut self, mut progress: F) -> PipelineResult<LabelTable>
    where
        F: FnMut(usize, usize),
    {
        let records = self.store.load_records().await?;
        let model = self.store.load_model().await?;
        let assignments = self.store.load_final().await?;

        let ids: BTreeSet<i64> = assignments
            .iter()
            .map(|a| a.final_cluster)
            .filter(|&id| id != UNASSIGNED)
            .collect();
        let groups = group_members(&records, &assignments, ids);

        let total = groups.len();
        let mut done = 0;
        let labels = LabelDeriver::new(&model)
            .with_keywords(self.config.labeling.keywords)
            .with_titles(self.config.labeling.titles)
            .label_all(&records, &groups, |_| {
                done += 1;
                progress(done, total);
            });

        self.store.save_labels(&labels).await?;
        Ok(labels)
    }

    /// Run every stage from raw records to labels.
    pub async fn run<F>(&mut self, raw: Vec<Record>, progress: F) -> PipelineResult<LabelTable>
    where
        F: FnMut(usize, usize),
    {
        self.preprocess(raw).await?;
        self.train().await?;
        self.consolidate().await?;
        self.label(progress).await
    }

    /// Render the HTML cluster report from the persisted artifacts.
    pub async fn report(&self) -> PipelineResult<String> {
        let records = self.store.load_records().await?;
        let assignments = self.store.load_final().await?;
        let labels = self.store.load_labels().await?;
        Ok(render_html_report(&labels, &records, &assignments))
    }

    /// Silhouette of the coarse pass and an inertia sweep.
    pub async fn evaluate(&self) -> PipelineResult<Evaluation> {
        let records = self.store.load_records().await?;
        let model = self.store.load_model().await?;
        let coarse = self.store.load_coarse().await?;

        let texts: Vec<&str> = records.iter().map(|r| r.clean_abstract.as_str()).collect();
        let vectors = model.transform_batch(&texts);

        let (coarse_table, repeated) =
            KeyedTable::from_rows(coarse.iter().map(|c| (c.link.clone(), c.cluster)));
        log_repeated("coarse_assignments", &repeated);
        let (joined, report) = left_outer_join(&records, |r| r.link.as_str(), &coarse_table);
        report.log("records x coarse_assignments");

        // Records without a coarse row are left out of the score.
        let (assigned, labels): (Vec<Vec<f32>>, Vec<usize>) = joined
            .iter()
            .zip(vectors.iter())
            .filter_map(|((_, cluster), v)| cluster.map(|&c| (v.clone(), c as usize)))
            .unzip();
        let silhouette = silhouette_score(&assigned, &labels);
        info!(?silhouette, "Coarse silhouette");

        let range = self.config.evaluation.k_min..=self.config.evaluation.k_max;
        let inertia = inertia_sweep(&vectors, range, &self.config.coarse.kmeans())?;

        Ok(Evaluation { silhouette, inertia })
    }
}
