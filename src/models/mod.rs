//! Core data models for the topic pipeline.
//!
//! This module contains the fundamental data structures shared by the batch
//! stages and the query layer: input records, cluster assignments, derived
//! labels and association rules.

use serde::{Deserialize, Serialize};

/// Final cluster identifier written for records excluded from every pass.
pub const UNASSIGNED: i64 = -1;

/// String form of [`UNASSIGNED`] used at the query boundary.
pub const UNCATEGORIZED_ID: &str = "-1";

/// Display name for records that have no final cluster.
pub const UNCATEGORIZED_NAME: &str = "Uncategorized";

/// Keyword shown for a cluster that has no members.
pub const NO_ARTICLES: &str = "(no articles)";

/// One input publication.
///
/// The `link` is the natural key. It must be unique across the corpus once
/// duplicates have been reviewed (see [`crate::preprocess::dedup_records`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Source link, used as the natural key
    pub link: String,

    /// Publication title
    pub title: String,

    /// Raw abstract text
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,

    /// Normalized token string derived from the abstract.
    ///
    /// Empty until [`crate::preprocess::preprocess`] has run.
    #[serde(default)]
    pub clean_abstract: String,
}

impl Record {
    /// Create a record with an empty cleaned abstract.
    pub fn new(link: impl Into<String>, title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            title: title.into(),
            abstract_text: abstract_text.into(),
            clean_abstract: String::new(),
        }
    }

    /// Whether two rows sharing a natural key carry the same content.
    pub fn same_content(&self, other: &Record) -> bool {
        self.title == other.title && self.abstract_text == other.abstract_text
    }
}

/// Row of the coarse assignment table produced by the first partitioning pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoarseAssignment {
    /// Natural key of the record
    pub link: String,

    /// Coarse cluster id in `[0, k)`
    pub cluster: u32,
}

/// Row of the final assignment table produced by the consolidator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalAssignment {
    /// Natural key of the record
    pub link: String,

    /// Final cluster id, or [`UNASSIGNED`]
    pub final_cluster: i64,
}

impl FinalAssignment {
    /// Whether this record was excluded from every re-clustering pass.
    pub fn is_unassigned(&self) -> bool {
        self.final_cluster == UNASSIGNED
    }
}

/// Human-readable signature of a final cluster.
///
/// Labels are derived from the centroid of the member vectors and never
/// authored by hand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterLabel {
    /// Top-weighted vocabulary terms, highest weight first
    pub keywords: Vec<String>,

    /// First titles of the cluster in load order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_titles: Vec<String>,

    /// Number of member records
    #[serde(default)]
    pub size: usize,
}

impl ClusterLabel {
    /// Sentinel label for a cluster without members.
    pub fn no_articles() -> Self {
        Self {
            keywords: vec![NO_ARTICLES.to_string()],
            sample_titles: Vec::new(),
            size: 0,
        }
    }

    /// Whether this is the empty-cluster sentinel.
    pub fn is_empty_sentinel(&self) -> bool {
        self.size == 0 && self.keywords.len() == 1 && self.keywords[0] == NO_ARTICLES
    }

    /// Short display name built from the first three keywords.
    pub fn display_name(&self) -> String {
        self.keywords
            .iter()
            .take(3)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// A confidence/lift scored co-occurrence rule between keyword sets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssociationRule {
    /// Terms on the left-hand side, sorted
    pub antecedents: Vec<String>,

    /// Terms on the right-hand side, sorted
    pub consequents: Vec<String>,

    /// Fraction of documents containing all terms of the rule
    pub support: f64,

    /// `support(rule) / support(antecedents)`
    pub confidence: f64,

    /// `confidence / support(consequents)`
    pub lift: f64,
}

/// An article joined with its final cluster, as served by the query layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticleView {
    /// Natural key
    pub link: String,

    /// Publication title
    pub title: String,

    /// Raw abstract text
    #[serde(rename = "abstract")]
    pub abstract_text: String,

    /// Final cluster id in string form ([`UNCATEGORIZED_ID`] when missing)
    pub final_cluster: String,

    /// Cluster display name ([`UNCATEGORIZED_NAME`] when missing)
    pub cluster_name: String,
}

/// Summary of one final cluster for listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterSummary {
    /// Final cluster id in string form
    pub id: String,

    /// Display name derived from the label
    pub name: String,

    /// Top keywords of the label
    pub keywords: Vec<String>,

    /// Number of articles currently assigned to this cluster
    pub article_count: usize,
}
