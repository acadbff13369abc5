//! Paper Topics - a topic-clustered knowledge base over scientific publications.
//!
//! This library turns a list of publication records into final topic clusters
//! with derived labels and a keyword association index, and serves the result
//! through a read-only query layer.
//!
//! # Architecture
//!
//! The system is organized into several key modules:
//!
//! - **models**: Core data structures (Record, ClusterLabel, AssociationRule, etc.)
//! - **preprocess**: Abstract cleaning and duplicate detection
//! - **vectorize**: TF-IDF fitting and the transform-only vectorizer handle
//! - **partition**: Seeded k-means partitioning
//! - **consolidate**: Re-splitting of coarse clusters with collision-free ids
//! - **label**: Centroid keyword labels and sample titles
//! - **associations**: Frequent itemsets and confidence/lift rules
//! - **join**: Keyed tables and left-outer joins on the natural key
//! - **storage**: Artifact persistence (JSON directory)
//! - **query**: Filtered, paginated listings over the artifacts
//! - **server**: HTTP query layer
//! - **pipeline**: Orchestration of the batch stages
//! - **evaluate** / **report**: Diagnostics and the HTML cluster report
//! - **config**: TOML configuration
//!
//! # Workflow
//!
//! ## Offline Batch
//!
//! 1. Deduplicate records and clean abstracts
//! 2. Fit the TF-IDF model once over the whole corpus
//! 3. Partition the corpus into a few coarse clusters
//! 4. Re-split each coarse cluster, allocating final ids from one counter
//! 5. Label every final cluster from its centroid
//! 6. Mine keyword association rules
//!
//! ## Online Query
//!
//! 1. Load records, final assignments, labels and rules
//! 2. Join them on the natural key (missing assignments become uncategorized)
//! 3. Serve cluster, article and rule listings
//!
//! # Example
//!
//! ```ignore
//! use paper_topics::{
//!     config::PipelineConfig,
//!     pipeline::Pipeline,
//!     storage::json::{read_records_file, JsonArtifactStore},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = JsonArtifactStore::open("data/artifacts").await?;
//!     let mut pipeline = Pipeline::new(store, PipelineConfig::default());
//!
//!     let raw = read_records_file("data/articles.json").await?;
//!     let labels = pipeline.run(raw, |_, _| {}).await?;
//!
//!     for (id, label) in labels.iter() {
//!         println!("{id}: {}", label.display_name());
//!     }
//!     Ok(())
//! }
//! ```

// Public modules
pub mod associations;
pub mod config;
pub mod consolidate;
pub mod evaluate;
pub mod join;
pub mod label;
pub mod models;
pub mod partition;
pub mod pipeline;
pub mod preprocess;
pub mod query;
pub mod report;
pub mod server;
pub mod storage;
pub mod vectorize;

// Re-export commonly used types at the crate root
pub use consolidate::{allocate, ClusterConsolidator, Consolidation, SubClusterTargets};
pub use label::{LabelDeriver, LabelTable};
pub use models::{AssociationRule, ClusterLabel, CoarseAssignment, FinalAssignment, Record};
pub use partition::{Kmeans, Partitioner};
pub use storage::ArtifactStore;
pub use vectorize::{TextVectorizer, TfidfFitter, TfidfModel};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
