//! Read-only query layer over the persisted artifacts.
//!
//! A [`Catalog`] joins the record table, the final assignment table and the
//! label table once, at load time, and then answers filtered and paginated
//! listings. A record whose link has no final assignment is reported in the
//! uncategorized bucket (id `"-1"`) rather than as an error.
//!
//! # Usage
//!
//! ```rust,no_run
//! use paper_topics::query::{ArticleQuery, Catalog};
//! use paper_topics::storage::json::JsonArtifactStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = JsonArtifactStore::open("data/artifacts").await?;
//! let catalog = Catalog::load(&store).await?;
//!
//! let query = ArticleQuery {
//!     search: Some("microgravity".to_string()),
//!     ..ArticleQuery::default()
//! };
//! let page = catalog.list_articles(&query)?;
//! for article in page.items {
//!     println!("[{}] {}", article.final_cluster, article.title);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::join::{left_outer_join, log_repeated, KeyedTable};
use crate::label::LabelTable;
use crate::models::{
    ArticleView, AssociationRule, ClusterSummary, FinalAssignment, Record, UNASSIGNED,
    UNCATEGORIZED_ID, UNCATEGORIZED_NAME,
};
use crate::storage::{ArtifactStore, StorageError};

/// Default page size for article listings.
pub const DEFAULT_ARTICLE_LIMIT: usize = 20;

/// Default page size for rule listings.
pub const DEFAULT_RULE_LIMIT: usize = 10;

/// Largest accepted page size.
pub const MAX_LIMIT: usize = 100;

/// Default minimum confidence for rule listings.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

/// Errors that can occur during query processing.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Invalid query parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Artifacts could not be loaded
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Article listing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleQuery {
    /// Only articles of this final cluster (string form, `"-1"` for uncategorized)
    pub cluster_id: Option<String>,

    /// Case-insensitive substring matched against title and abstract
    pub search: Option<String>,

    /// Number of matches to skip
    pub skip: usize,

    /// Page size, `1..=100`
    pub limit: usize,
}

impl Default for ArticleQuery {
    fn default() -> Self {
        Self {
            cluster_id: None,
            search: None,
            skip: 0,
            limit: DEFAULT_ARTICLE_LIMIT,
        }
    }
}

/// Association rule listing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationQuery {
    /// Only rules whose antecedents contain this term
    pub term: Option<String>,

    /// Minimum confidence, `0.0..=1.0`
    pub min_confidence: f64,

    /// Number of matches to skip
    pub skip: usize,

    /// Page size, `1..=100`
    pub limit: usize,
}

impl Default for AssociationQuery {
    fn default() -> Self {
        Self {
            term: None,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            skip: 0,
            limit: DEFAULT_RULE_LIMIT,
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    /// Number of matches before pagination
    pub total_results: usize,

    /// Matches on this page
    pub items: Vec<T>,

    /// Echo of the request offset
    pub skip: usize,

    /// Echo of the request page size
    pub limit: usize,
}

fn check_limit(limit: usize) -> QueryResult<()> {
    if limit == 0 || limit > MAX_LIMIT {
        return Err(QueryError::InvalidQuery(format!(
            "limit must be between 1 and {MAX_LIMIT}, got {limit}"
        )));
    }
    Ok(())
}

fn paginate<T: Clone>(matches: Vec<&T>, skip: usize, limit: usize) -> Page<T> {
    Page {
        total_results: matches.len(),
        items: matches.into_iter().skip(skip).take(limit).cloned().collect(),
        skip,
        limit,
    }
}

/// In-memory joined view of the artifacts.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    articles: Vec<ArticleView>,
    // Lowercased "title\nabstract" per article, for search.
    haystacks: Vec<String>,
    by_link: HashMap<String, usize>,
    clusters: Vec<ClusterSummary>,
    rules: Vec<AssociationRule>,
}

impl Catalog {
    /// Join the artifacts into a catalog.
    ///
    /// # Arguments
    /// * `records` - Record table, one row per article
    /// * `assignments` - Final assignment table
    /// * `labels` - Label table keyed by final id
    /// * `rules` - Association rules
    pub fn build(
        records: &[Record],
        assignments: &[FinalAssignment],
        labels: &LabelTable,
        rules: Vec<AssociationRule>,
    ) -> Self {
        let (table, repeated) = KeyedTable::from_rows(
            assignments
                .iter()
                .map(|a| (a.link.clone(), a.final_cluster)),
        );
        log_repeated("final_assignments", &repeated);
        let (joined, report) = left_outer_join(records, |r| r.link.as_str(), &table);
        report.log("records x final_assignments");

        let mut counts: HashMap<i64, usize> = HashMap::new();
        let mut articles = Vec::with_capacity(joined.len());
        let mut haystacks = Vec::with_capacity(joined.len());
        let mut by_link = HashMap::with_capacity(joined.len());

        for (record, cluster) in joined {
            let cluster = cluster.copied().unwrap_or(UNASSIGNED);
            let (final_cluster, cluster_name) = match labels.get(cluster) {
                Some(label) if cluster != UNASSIGNED => (cluster.to_string(), label.display_name()),
                _ if cluster == UNASSIGNED => {
                    (UNCATEGORIZED_ID.to_string(), UNCATEGORIZED_NAME.to_string())
                }
                // Assigned but unlabelled: keep the id, name falls back to it.
                _ => (cluster.to_string(), format!("Cluster {cluster}")),
            };
            *counts.entry(cluster).or_insert(0) += 1;

            by_link
                .entry(record.link.clone())
                .or_insert(articles.len());
            haystacks.push(format!("{}\n{}", record.title, record.abstract_text).to_lowercase());
            articles.push(ArticleView {
                link: record.link.clone(),
                title: record.title.clone(),
                abstract_text: record.abstract_text.clone(),
                final_cluster,
                cluster_name,
            });
        }

        let clusters: Vec<ClusterSummary> = labels
            .iter()
            .map(|(id, label)| ClusterSummary {
                id: id.to_string(),
                name: label.display_name(),
                keywords: label.keywords.clone(),
                article_count: counts.get(&id).copied().unwrap_or(0),
            })
            .collect();

        info!(
            articles = articles.len(),
            clusters = clusters.len(),
            uncategorized = counts.get(&UNASSIGNED).copied().unwrap_or(0),
            rules = rules.len(),
            "Built catalog"
        );

        Self {
            articles,
            haystacks,
            by_link,
            clusters,
            rules,
        }
    }

    /// Load every artifact from a store and build the catalog.
    ///
    /// Missing final assignments, labels or rules are treated as empty, so
    /// a store holding only records serves everything as uncategorized.
    ///
    /// # Errors
    /// Returns `QueryError::Storage` if the records cannot be loaded or any
    /// present artifact is unreadable
    pub async fn load<S: ArtifactStore + ?Sized>(store: &S) -> QueryResult<Self> {
        let records = store.load_records().await?;
        let assignments = or_empty(store.load_final().await, "final assignments")?;
        let labels = or_empty(store.load_labels().await, "cluster labels")?;
        let rules = or_empty(store.load_rules().await, "association rules")?;
        Ok(Self::build(&records, &assignments, &labels, rules))
    }

    /// All labelled clusters, ascending by numeric id.
    pub fn list_clusters(&self) -> &[ClusterSummary] {
        &self.clusters
    }

    /// Filter and paginate articles.
    ///
    /// # Errors
    /// Returns `QueryError::InvalidQuery` if `limit` is outside `1..=100`
    pub fn list_articles(&self, query: &ArticleQuery) -> QueryResult<Page<ArticleView>> {
        check_limit(query.limit)?;

        let needle = query
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());
        let cluster = query.cluster_id.as_deref().map(str::trim);

        let matches: Vec<&ArticleView> = self
            .articles
            .iter()
            .zip(self.haystacks.iter())
            .filter(|(_, hay)| needle.as_deref().map_or(true, |n| hay.contains(n)))
            .filter(|(a, _)| cluster.map_or(true, |c| a.final_cluster == c))
            .map(|(a, _)| a)
            .collect();

        Ok(paginate(matches, query.skip, query.limit))
    }

    /// Filter, sort (lift then confidence, descending) and paginate rules.
    ///
    /// # Errors
    /// Returns `QueryError::InvalidQuery` if `limit` is outside `1..=100` or
    /// `min_confidence` is outside `0.0..=1.0`
    pub fn list_associations(&self, query: &AssociationQuery) -> QueryResult<Page<AssociationRule>> {
        check_limit(query.limit)?;
        if !(0.0..=1.0).contains(&query.min_confidence) {
            return Err(QueryError::InvalidQuery(format!(
                "min_confidence must be between 0.0 and 1.0, got {}",
                query.min_confidence
            )));
        }

        let term = query
            .term
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());

        let mut matches: Vec<&AssociationRule> = self
            .rules
            .iter()
            .filter(|r| r.confidence >= query.min_confidence)
            .filter(|r| term.as_deref().map_or(true, |t| r.antecedents.iter().any(|a| a == t)))
            .collect();
        matches.sort_by(|a, b| {
            b.lift
                .total_cmp(&a.lift)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
        });

        Ok(paginate(matches, query.skip, query.limit))
    }

    /// Article by link.
    pub fn article(&self, link: &str) -> Option<&ArticleView> {
        self.by_link.get(link).map(|&i| &self.articles[i])
    }

    /// Final cluster id of a link in string form.
    ///
    /// Unknown links and links without a final assignment both map to the
    /// uncategorized id.
    pub fn cluster_of(&self, link: &str) -> &str {
        self.article(link)
            .map(|a| a.final_cluster.as_str())
            .unwrap_or(UNCATEGORIZED_ID)
    }

    /// Number of articles.
    pub fn article_count(&self) -> usize {
        self.articles.len()
    }
}

fn or_empty<T: Default>(result: Result<T, StorageError>, what: &str) -> QueryResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(StorageError::NotFound(path)) => {
            warn!(artifact = what, %path, "Artifact missing; serving it as empty");
            Ok(T::default())
        }
        Err(e) => Err(e.into()),
    }
}
