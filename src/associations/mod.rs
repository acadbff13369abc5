//! Keyword association mining.
//!
//! Each cleaned abstract becomes a transaction: the set of vocabulary terms it
//! contains. Frequent itemsets are found level by level (apriori), and every
//! frequent itemset of two or more terms is split into antecedent and
//! consequent to produce confidence and lift scored rules.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::AssociationRule;
use crate::vectorize::{tokenize, TextVectorizer};

/// Default minimum itemset support.
pub const DEFAULT_MIN_SUPPORT: f64 = 0.04;

/// Default minimum rule confidence.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

/// Errors returned by the miner.
#[derive(Debug, Error, PartialEq)]
pub enum AssociationError {
    /// A threshold is outside `(0, 1]` / `[0, 1]`
    #[error("Invalid mining parameter {name}: {value}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Offending value
        value: f64,
    },
}

/// Result type for association mining.
pub type AssociationResult<T> = Result<T, AssociationError>;

/// A frequent itemset with its absolute count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequentItemset {
    /// Vocabulary positions, ascending
    pub items: Vec<usize>,

    /// Number of transactions containing every item
    pub count: usize,
}

/// Build one transaction per text from the vocabulary of `vectorizer`.
pub fn transactions<V>(vectorizer: &V, texts: &[&str]) -> Vec<BTreeSet<usize>>
where
    V: TextVectorizer + ?Sized,
{
    let index: HashMap<&str, usize> = vectorizer
        .terms()
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();
    texts
        .iter()
        .map(|text| tokenize(text).filter_map(|t| index.get(t).copied()).collect())
        .collect()
}

/// Level-wise frequent itemset and rule miner.
#[derive(Debug, Clone)]
pub struct AssociationMiner {
    min_support: f64,
    min_confidence: f64,
    max_len: Option<usize>,
}

impl Default for AssociationMiner {
    fn default() -> Self {
        Self {
            min_support: DEFAULT_MIN_SUPPORT,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_len: None,
        }
    }
}

impl AssociationMiner {
    /// Create a miner with the given thresholds.
    ///
    /// # Errors
    /// Returns `AssociationError::InvalidParameter` if `min_support` is not in
    /// `(0, 1]` or `min_confidence` is not in `[0, 1]`.
    pub fn new(min_support: f64, min_confidence: f64) -> AssociationResult<Self> {
        if !(min_support > 0.0 && min_support <= 1.0) {
            return Err(AssociationError::InvalidParameter {
                name: "min_support",
                value: min_support,
            });
        }
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(AssociationError::InvalidParameter {
                name: "min_confidence",
                value: min_confidence,
            });
        }
        Ok(Self {
            min_support,
            min_confidence,
            max_len: None,
        })
    }

    /// Limit the size of mined itemsets.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    /// Find every itemset whose support reaches `min_support`.
    ///
    /// Itemsets are returned by size, then lexicographically.
    pub fn frequent_itemsets(&self, transactions: &[BTreeSet<usize>]) -> Vec<FrequentItemset> {
        let n = transactions.len();
        if n == 0 {
            return Vec::new();
        }
        let is_frequent = |count: usize| count as f64 / n as f64 >= self.min_support;

        let mut singles: HashMap<usize, usize> = HashMap::new();
        for t in transactions {
            for &item in t {
                *singles.entry(item).or_insert(0) += 1;
            }
        }
        let mut level: Vec<FrequentItemset> = singles
            .into_iter()
            .filter(|(_, c)| is_frequent(*c))
            .map(|(item, count)| FrequentItemset {
                items: vec![item],
                count,
            })
            .collect();
        level.sort_by(|a, b| a.items.cmp(&b.items));

        let mut all = Vec::new();
        let mut size = 1;
        while !level.is_empty() {
            debug!(size, itemsets = level.len(), "Frequent itemsets at level");
            all.extend(level.iter().cloned());
            if self.max_len.is_some_and(|m| size >= m) {
                break;
            }

            let candidates = next_candidates(&level);
            level = candidates
                .into_iter()
                .filter_map(|items| {
                    let count = transactions
                        .iter()
                        .filter(|t| items.iter().all(|i| t.contains(i)))
                        .count();
                    is_frequent(count).then_some(FrequentItemset { items, count })
                })
                .collect();
            size += 1;
        }

        all
    }

    /// Mine rules from the transactions.
    ///
    /// # Arguments
    /// * `transactions` - One set of vocabulary positions per document
    /// * `terms` - Vocabulary terms indexed by position
    ///
    /// # Returns
    /// Rules ordered by itemset (size, then terms) and then by antecedent.
    pub fn mine(&self, transactions: &[BTreeSet<usize>], terms: &[String]) -> Vec<AssociationRule> {
        let n = transactions.len() as f64;
        let itemsets = self.frequent_itemsets(transactions);
        let counts: HashMap<&[usize], usize> = itemsets
            .iter()
            .map(|s| (s.items.as_slice(), s.count))
            .collect();

        let name = |items: &[usize]| -> Vec<String> {
            items
                .iter()
                .filter_map(|&i| terms.get(i).cloned())
                .collect()
        };

        let mut rules = Vec::new();
        for set in itemsets.iter().filter(|s| s.items.len() >= 2) {
            let len = set.items.len();
            if len >= 64 {
                warn!(len, "Skipping rule generation for an oversized itemset");
                continue;
            }

            let mut splits: Vec<(Vec<usize>, Vec<usize>)> = (1..(1u64 << len) - 1)
                .map(|mask| {
                    let (ante, cons): (Vec<(usize, usize)>, Vec<(usize, usize)>) = set
                        .items
                        .iter()
                        .copied()
                        .enumerate()
                        .partition(|(pos, _)| mask & (1u64 << *pos) != 0);
                    (
                        ante.into_iter().map(|(_, i)| i).collect(),
                        cons.into_iter().map(|(_, i)| i).collect(),
                    )
                })
                .collect();
            splits.sort();

            let support = set.count as f64 / n;
            for (ante, cons) in splits {
                // Subsets of a frequent itemset are frequent, so both lookups hit.
                let (Some(&ante_count), Some(&cons_count)) =
                    (counts.get(ante.as_slice()), counts.get(cons.as_slice()))
                else {
                    continue;
                };
                let confidence = set.count as f64 / ante_count as f64;
                if confidence < self.min_confidence {
                    continue;
                }
                let lift = confidence / (cons_count as f64 / n);
                rules.push(AssociationRule {
                    antecedents: name(&ante),
                    consequents: name(&cons),
                    support,
                    confidence,
                    lift,
                });
            }
        }

        info!(
            transactions = transactions.len(),
            itemsets = itemsets.len(),
            rules = rules.len(),
            min_support = self.min_support,
            min_confidence = self.min_confidence,
            "Mined association rules"
        );
        rules
    }
}

/// Join itemsets of one level that share all but their last item, keeping
/// candidates whose every subset is frequent.
fn next_candidates(level: &[FrequentItemset]) -> Vec<Vec<usize>> {
    let frequent: HashSet<&[usize]> = level.iter().map(|s| s.items.as_slice()).collect();
    let mut candidates = Vec::new();

    for (i, a) in level.iter().enumerate() {
        for b in &level[i + 1..] {
            let k = a.items.len();
            if a.items[..k - 1] != b.items[..k - 1] {
                // level is sorted, so no later b shares a's prefix either
                break;
            }
            let mut items = a.items.clone();
            items.push(b.items[k - 1]);

            let all_subsets_frequent = (0..items.len()).all(|skip| {
                let subset: Vec<usize> = items
                    .iter()
                    .enumerate()
                    .filter(|(pos, _)| *pos != skip)
                    .map(|(_, &x)| x)
                    .collect();
                frequent.contains(subset.as_slice())
            });
            if all_subsets_frequent {
                candidates.push(items);
            }
        }
    }

    candidates
}
