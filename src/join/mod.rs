//! Keyed tables and left-outer joins on the natural key.
//!
//! Every join in the pipeline attaches a per-record value (coarse cluster,
//! final cluster) to the record table by link. The contract is:
//!
//! - the right side is a [`KeyedTable`], whose keys are unique by
//!   construction; repeated keys are reported, and the first row wins
//! - the join is left-outer, so it yields exactly one output row per left row
//! - a left row without a match gets `None`, which the caller maps to an
//!   explicit sentinel
//!
//! The [`JoinReport`] carries the integrity findings so they can be logged.

use std::collections::{HashMap, HashSet};

use tracing::warn;

/// A key that appeared more than once while building a [`KeyedTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatedKey<V> {
    /// The repeated key
    pub key: String,

    /// Value of the row that was kept
    pub kept: V,

    /// Value of the later row that was not kept
    pub discarded: V,
}

/// Table of values with unique string keys, iterated in insertion order.
#[derive(Debug, Clone)]
pub struct KeyedTable<V> {
    rows: Vec<(String, V)>,
    index: HashMap<String, usize>,
}

impl<V: Clone> KeyedTable<V> {
    /// Build a table from rows, keeping the first row for every key.
    ///
    /// Later rows with an already-seen key are returned rather than merged.
    pub fn from_rows<I>(rows: I) -> (Self, Vec<RepeatedKey<V>>)
    where
        I: IntoIterator<Item = (String, V)>,
    {
        let mut table = Self {
            rows: Vec::new(),
            index: HashMap::new(),
        };
        let mut repeated = Vec::new();

        for (key, value) in rows {
            match table.index.get(&key) {
                Some(&i) => repeated.push(RepeatedKey {
                    key,
                    kept: table.rows[i].1.clone(),
                    discarded: value,
                }),
                None => {
                    table.index.insert(key.clone(), table.rows.len());
                    table.rows.push((key, value));
                }
            }
        }

        (table, repeated)
    }
}

impl<V> KeyedTable<V> {
    /// Value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.index.get(key).map(|&i| &self.rows[i].1)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.rows.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Integrity findings of a left-outer join.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinReport {
    /// Rows on the left side
    pub left_rows: usize,

    /// Distinct keys on the right side
    pub right_keys: usize,

    /// Left rows that found a match
    pub matched: usize,

    /// Left keys with no match on the right, in left order
    pub unmatched_left: Vec<String>,

    /// Right keys that no left row refers to
    pub unmatched_right: Vec<String>,

    /// Rows produced by the join
    pub output_rows: usize,
}

impl JoinReport {
    /// Whether the join produced exactly one row per left row.
    pub fn row_count_stable(&self) -> bool {
        self.output_rows == self.left_rows
    }

    /// Emit warnings for every finding.
    pub fn log(&self, join: &str) {
        if !self.unmatched_left.is_empty() {
            warn!(
                join,
                count = self.unmatched_left.len(),
                "Left rows without a match; they get the default value"
            );
        }
        if !self.unmatched_right.is_empty() {
            warn!(
                join,
                count = self.unmatched_right.len(),
                "Right rows whose key is not on the left side"
            );
        }
        if !self.row_count_stable() {
            warn!(
                join,
                left = self.left_rows,
                output = self.output_rows,
                "Join produced more rows than expected"
            );
        }
    }
}

/// Left-outer join of `left` against `right` on the key extracted by `key`.
///
/// Produces one entry per left row, in left order.
pub fn left_outer_join<'a, L, V, F>(
    left: &'a [L],
    key: F,
    right: &'a KeyedTable<V>,
) -> (Vec<(&'a L, Option<&'a V>)>, JoinReport)
where
    F: Fn(&L) -> &str,
{
    let mut joined = Vec::with_capacity(left.len());
    let mut report = JoinReport {
        left_rows: left.len(),
        right_keys: right.len(),
        ..Default::default()
    };
    let mut referenced: HashSet<&str> = HashSet::new();

    for row in left {
        let k = key(row);
        let value = right.get(k);
        match value {
            Some(_) => {
                report.matched += 1;
                referenced.insert(k);
            }
            None => report.unmatched_left.push(k.to_string()),
        }
        joined.push((row, value));
    }

    report.unmatched_right = right
        .iter()
        .filter(|(k, _)| !referenced.contains(k))
        .map(|(k, _)| k.to_string())
        .collect();
    report.output_rows = joined.len();

    (joined, report)
}

/// Log repeated keys found while building a table.
pub fn log_repeated<V: std::fmt::Debug + PartialEq>(table: &str, repeated: &[RepeatedKey<V>]) {
    for r in repeated {
        if r.kept == r.discarded {
            warn!(table, key = %r.key, "Repeated key with identical value; later row ignored");
        } else {
            warn!(
                table,
                key = %r.key,
                kept = ?r.kept,
                discarded = ?r.discarded,
                "Repeated key with conflicting values; keeping the first row"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_table_keeps_first() {
        let (table, repeated) = KeyedTable::from_rows(vec![
            ("a".to_string(), 1),
            ("b".to_string(), 2),
            ("a".to_string(), 3),
        ]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("a"), Some(&1));
        assert_eq!(repeated, vec![RepeatedKey { key: "a".into(), kept: 1, discarded: 3 }]);
        let keys: Vec<&str> = table.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_left_outer_join_one_row_per_left() {
        let left = vec!["a", "b", "c"];
        let (right, _) = KeyedTable::from_rows(vec![("a".to_string(), 10), ("z".to_string(), 99)]);
        let (joined, report) = left_outer_join(&left, |s| s, &right);

        assert_eq!(joined.len(), 3);
        assert_eq!(joined[0].1, Some(&10));
        assert_eq!(joined[1].1, None);
        assert_eq!(report.matched, 1);
        assert_eq!(report.unmatched_left, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(report.unmatched_right, vec!["z".to_string()]);
        assert!(report.row_count_stable());
    }

    #[test]
    fn test_join_empty_right() {
        let left = vec!["a"];
        let (right, _) = KeyedTable::<i32>::from_rows(Vec::new());
        let (joined, report) = left_outer_join(&left, |s| s, &right);
        assert_eq!(joined[0].1, None);
        assert_eq!(report.matched, 0);
        assert!(right.is_empty());
    }
}
