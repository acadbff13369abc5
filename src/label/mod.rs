//! Cluster label derivation.
//!
//! A label is the top-weighted vocabulary terms of the cluster centroid plus
//! the first few member titles in load order. Nothing here is randomized, so
//! the same members and model always produce the same label.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::join::{left_outer_join, KeyedTable};
use crate::models::{ClusterLabel, FinalAssignment, Record};
use crate::partition::centroid;
use crate::vectorize::TextVectorizer;

/// Default number of keywords per label.
pub const DEFAULT_KEYWORDS: usize = 7;

/// Default number of sample titles per label.
pub const DEFAULT_TITLES: usize = 4;

/// Indices of the `n` largest weights, highest first.
///
/// Equal weights keep vocabulary order (lower position first).
pub fn top_term_indices(weights: &[f32], n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..weights.len()).collect();
    // sort_by is stable, so ties stay in ascending index order
    order.sort_by(|&a, &b| {
        weights[b]
            .partial_cmp(&weights[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(n);
    order
}

/// Derive a label from member vectors and titles.
///
/// # Arguments
/// * `member_vectors` - Vectors of the members, all of the model's dimension
/// * `member_titles` - Titles of the members in load order
/// * `terms` - Vocabulary terms indexed by vector position
/// * `keywords` - Number of keywords to keep
/// * `titles` - Number of sample titles to keep
///
/// # Returns
/// The derived label, or [`ClusterLabel::no_articles`] if there are no
/// members.
pub fn derive_label(
    member_vectors: &[Vec<f32>],
    member_titles: &[&str],
    terms: &[String],
    keywords: usize,
    titles: usize,
) -> ClusterLabel {
    let Some(center) = centroid(member_vectors, terms.len()) else {
        return ClusterLabel::no_articles();
    };

    let keywords = top_term_indices(&center, keywords)
        .into_iter()
        .filter_map(|i| terms.get(i).cloned())
        .collect();

    ClusterLabel {
        keywords,
        sample_titles: member_titles.iter().take(titles).map(|t| t.to_string()).collect(),
        size: member_vectors.len(),
    }
}

/// Labels of all final clusters, ordered by numeric id.
///
/// Serializes as a JSON object keyed by the string form of the id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelTable(BTreeMap<i64, ClusterLabel>);

impl LabelTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the label of a cluster.
    pub fn insert(&mut self, id: i64, label: ClusterLabel) {
        self.0.insert(id, label);
    }

    /// Label by numeric id.
    pub fn get(&self, id: i64) -> Option<&ClusterLabel> {
        self.0.get(&id)
    }

    /// Label by the string form used at the query boundary.
    pub fn get_str(&self, id: &str) -> Option<&ClusterLabel> {
        id.trim().parse::<i64>().ok().and_then(|id| self.get(id))
    }

    /// Labels in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &ClusterLabel)> {
        self.0.iter().map(|(id, label)| (*id, label))
    }

    /// Number of labelled clusters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Members of one final cluster, as indices into the record table.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMembers {
    /// Final cluster id
    pub id: i64,

    /// Record indices in load order
    pub records: Vec<usize>,
}

/// Group records by final cluster.
///
/// Every id in `expected_ids` gets an entry even with no members; ids found
/// only in `assignments` are added too. Unassigned records are skipped.
pub fn group_members<I>(
    records: &[Record],
    assignments: &[FinalAssignment],
    expected_ids: I,
) -> Vec<ClusterMembers>
where
    I: IntoIterator<Item = i64>,
{
    let (table, _) = KeyedTable::from_rows(
        assignments
            .iter()
            .map(|a| (a.link.clone(), a.final_cluster)),
    );
    let (joined, report) = left_outer_join(records, |r| r.link.as_str(), &table);
    report.log("records x final_assignments");

    let mut groups: BTreeMap<i64, Vec<usize>> =
        expected_ids.into_iter().map(|id| (id, Vec::new())).collect();
    for (i, (_, cluster)) in joined.iter().enumerate() {
        match cluster {
            Some(&id) if id != crate::models::UNASSIGNED => groups.entry(id).or_default().push(i),
            _ => {}
        }
    }

    groups
        .into_iter()
        .map(|(id, records)| ClusterMembers { id, records })
        .collect()
}

/// Derives labels through a fitted, transform-only model.
pub struct LabelDeriver<'a, V: ?Sized> {
    vectorizer: &'a V,
    keywords: usize,
    titles: usize,
}

impl<'a, V: TextVectorizer + ?Sized> LabelDeriver<'a, V> {
    /// Create a deriver with the default keyword and title counts.
    pub fn new(vectorizer: &'a V) -> Self {
        Self {
            vectorizer,
            keywords: DEFAULT_KEYWORDS,
            titles: DEFAULT_TITLES,
        }
    }

    /// Set the number of keywords per label.
    pub fn with_keywords(mut self, keywords: usize) -> Self {
        self.keywords = keywords;
        self
    }

    /// Set the number of sample titles per label.
    pub fn with_titles(mut self, titles: usize) -> Self {
        self.titles = titles;
        self
    }

    /// Label one cluster from its member records.
    pub fn label(&self, records: &[Record], members: &ClusterMembers) -> ClusterLabel {
        let texts: Vec<&str> = members
            .records
            .iter()
            .map(|&i| records[i].clean_abstract.as_str())
            .collect();
        let titles: Vec<&str> = members
            .records
            .iter()
            .map(|&i| records[i].title.as_str())
            .collect();
        let vectors = self.vectorizer.transform_batch(&texts);
        let label = derive_label(
            &vectors,
            &titles,
            self.vectorizer.terms(),
            self.keywords,
            self.titles,
        );
        debug!(cluster = members.id, size = label.size, keywords = ?label.keywords, "Derived label");
        label
    }

    /// Label every group, calling `on_labelled` after each one.
    pub fn label_all<F>(
        &self,
        records: &[Record],
        groups: &[ClusterMembers],
        mut on_labelled: F,
    ) -> LabelTable
    where
        F: FnMut(i64),
    {
        let mut table = LabelTable::new();
        for members in groups {
            table.insert(members.id, self.label(records, members));
            on_labelled(members.id);
        }
        info!(clusters = table.len(), "Labelled final clusters");
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NO_ARTICLES, UNASSIGNED};
    use crate::vectorize::TfidfFitter;

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_top_terms_descending_with_stable_ties() {
        let weights = [0.1, 0.5, 0.5, 0.9, 0.0];
        assert_eq!(top_term_indices(&weights, 3), vec![3, 1, 2]);
        assert_eq!(top_term_indices(&weights, 10).len(), 5);
    }

    #[test]
    fn test_derive_label_two_members() {
        let vocab = terms(&["alpha", "beta", "gamma"]);
        let a = vec![1.0, 0.0, 0.5];
        let b = vec![0.0, 0.0, 0.5];
        let label = derive_label(&[a, b], &["A", "B"], &vocab, 2, 1);
        // centroid = [0.5, 0.0, 0.5]; alpha and gamma tie, vocabulary order wins
        assert_eq!(label.keywords, vec!["alpha", "gamma"]);
        assert_eq!(label.sample_titles, vec!["A"]);
        assert_eq!(label.size, 2);
    }

    #[test]
    fn test_derive_label_empty_is_sentinel() {
        let label = derive_label(&[], &[], &terms(&["alpha"]), 7, 4);
        assert!(label.is_empty_sentinel());
        assert_eq!(label.keywords, vec![NO_ARTICLES]);
    }

    #[test]
    fn test_label_table_keys_and_order() {
        let mut table = LabelTable::new();
        table.insert(104, ClusterLabel::no_articles());
        table.insert(99, ClusterLabel::no_articles());
        table.insert(100, ClusterLabel::no_articles());
        let ids: Vec<i64> = table.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![99, 100, 104]);
        assert!(table.get_str("104").is_some());
        assert!(table.get_str("x").is_none());

        let json = serde_json::to_value(&table).unwrap();
        assert!(json.get("104").is_some());
        let back: LabelTable = serde_json::from_value(json).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_group_members_includes_expected_empty_ids() {
        let records = vec![
            Record::new("a", "A", ""),
            Record::new("b", "B", ""),
            Record::new("c", "C", ""),
        ];
        let assignments = vec![
            FinalAssignment { link: "a".into(), final_cluster: 101 },
            FinalAssignment { link: "b".into(), final_cluster: UNASSIGNED },
            FinalAssignment { link: "c".into(), final_cluster: 101 },
        ];
        let groups = group_members(&records, &assignments, [100, 101]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], ClusterMembers { id: 100, records: vec![] });
        assert_eq!(groups[1], ClusterMembers { id: 101, records: vec![0, 2] });
    }

    #[test]
    fn test_label_deriver_with_tfidf() {
        let mut records = vec![
            Record::new("a", "Bone loss in mice", ""),
            Record::new("b", "Bone density", ""),
            Record::new("c", "Plant roots", ""),
        ];
        records[0].clean_abstract = "bone loss mice bone".into();
        records[1].clean_abstract = "bone density".into();
        records[2].clean_abstract = "plant roots".into();
        let corpus: Vec<&str> = records.iter().map(|r| r.clean_abstract.as_str()).collect();
        let model = TfidfFitter::new(100).fit(&corpus).unwrap();

        let deriver = LabelDeriver::new(&model).with_keywords(1).with_titles(4);
        let groups = vec![
            ClusterMembers { id: 100, records: vec![0, 1] },
            ClusterMembers { id: 101, records: vec![] },
        ];
        let mut seen = Vec::new();
        let table = deriver.label_all(&records, &groups, |id| seen.push(id));

        assert_eq!(seen, vec![100, 101]);
        let bone = table.get(100).unwrap();
        assert_eq!(bone.keywords, vec!["bone"]);
        assert_eq!(bone.sample_titles, vec!["Bone loss in mice", "Bone density"]);
        assert!(table.get(101).unwrap().is_empty_sentinel());
    }
}
