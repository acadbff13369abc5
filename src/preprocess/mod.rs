//! Abstract cleaning and duplicate review.
//!
//! Cleaning turns a raw abstract into the normalized token string that the
//! vectorizer and the association miner consume:
//!
//! - lowercase
//! - every character outside `a-z` and whitespace removed
//! - English stopwords and tokens of two characters or fewer dropped
//!
//! Duplicate review groups rows by natural key. Rows that agree on title and
//! abstract collapse safely; rows that disagree are reported so an operator
//! can resolve them.

mod stopwords;

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use crate::models::Record;

pub use stopwords::is_stopword;

/// Clean a raw abstract into a space-joined token string.
///
/// # Example
/// ```
/// use paper_topics::preprocess::clean_text;
/// assert_eq!(clean_text("The Effects of Microgravity on Bone!"), "effects microgravity bone");
/// ```
pub fn clean_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_whitespace())
        .collect();

    stripped
        .split_whitespace()
        .filter(|token| token.len() > 2 && !is_stopword(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fill `clean_abstract` for every record.
pub fn preprocess(records: &mut [Record]) {
    for record in records.iter_mut() {
        record.clean_abstract = clean_text(&record.abstract_text);
    }
    info!(records = records.len(), "Cleaned abstracts");
}

/// One natural key that appears on more than one row.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    /// The shared natural key
    pub link: String,

    /// Every row with this key, in load order
    pub rows: Vec<Record>,

    /// Whether the rows disagree on title or abstract
    pub divergent: bool,
}

/// Result of scanning a table for duplicated natural keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateReport {
    /// Total rows scanned
    pub total_rows: usize,

    /// Number of distinct natural keys
    pub unique_links: usize,

    /// Keys with more than one row, in order of first appearance
    pub groups: Vec<DuplicateGroup>,
}

impl DuplicateReport {
    /// Rows beyond the first for each duplicated key.
    pub fn surplus_rows(&self) -> usize {
        self.total_rows - self.unique_links
    }

    /// Duplicated keys whose rows carry different content.
    pub fn divergent(&self) -> impl Iterator<Item = &DuplicateGroup> {
        self.groups.iter().filter(|g| g.divergent)
    }

    /// Whether any duplicated key carries divergent content.
    pub fn has_divergent(&self) -> bool {
        self.groups.iter().any(|g| g.divergent)
    }
}

/// Scan records for duplicated natural keys.
pub fn find_duplicates(records: &[Record]) -> DuplicateReport {
    let mut by_link: HashMap<&str, Vec<&Record>> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for record in records {
        let rows = by_link.entry(record.link.as_str()).or_default();
        if rows.is_empty() {
            order.push(record.link.as_str());
        }
        rows.push(record);
    }

    let groups = order
        .iter()
        .filter_map(|link| {
            let rows = &by_link[link];
            if rows.len() < 2 {
                return None;
            }
            let divergent = rows.iter().any(|r| !r.same_content(rows[0]));
            Some(DuplicateGroup {
                link: link.to_string(),
                rows: rows.iter().map(|r| (*r).clone()).collect(),
                divergent,
            })
        })
        .collect();

    DuplicateReport {
        total_rows: records.len(),
        unique_links: order.len(),
        groups,
    }
}

/// Collapse duplicated natural keys to their first row.
///
/// Identical duplicates are dropped quietly. For divergent duplicates every
/// variant is logged as a data-integrity warning and the returned report lists
/// them, so the choice of the first row is always visible to the operator.
pub fn dedup_records(records: Vec<Record>) -> (Vec<Record>, DuplicateReport) {
    let report = find_duplicates(&records);

    for group in report.divergent() {
        warn!(
            link = %group.link,
            variants = group.rows.len(),
            "Natural key has divergent titles or abstracts; keeping the first row, manual review required"
        );
        for (i, row) in group.rows.iter().enumerate() {
            warn!(link = %group.link, variant = i, title = %row.title, "Divergent duplicate variant");
        }
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    let kept: Vec<Record> = records
        .into_iter()
        .filter(|r| seen.insert(r.link.clone()))
        .collect();

    if report.surplus_rows() > 0 {
        info!(
            dropped = report.surplus_rows(),
            remaining = kept.len(),
            "Removed duplicate rows by natural key"
        );
    }

    (kept, report)
}
