//! Clustering diagnostics.
//!
//! Numbers only: an inertia sweep over a range of `k` for elbow inspection,
//! and the mean silhouette coefficient of an assignment.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use tracing::info;

use crate::partition::{squared_euclidean, Kmeans, PartitionResult};

/// k-means inertia (mean squared distance to the nearest centroid) for
/// every `k` in `ks`.
///
/// Values of `k` larger than the number of vectors are skipped.
///
/// # Errors
/// Propagates any partitioning failure.
pub fn inertia_sweep(
    vectors: &[Vec<f32>],
    ks: RangeInclusive<usize>,
    kmeans: &Kmeans,
) -> PartitionResult<Vec<(usize, f64)>> {
    let mut out = Vec::new();
    for k in ks.filter(|&k| k >= 1 && k <= vectors.len()) {
        let fit = kmeans.fit(vectors, k)?;
        info!(k, inertia = fit.inertia, "Sweep point");
        out.push((k, fit.inertia));
    }
    Ok(out)
}

/// Mean silhouette coefficient with euclidean distance.
///
/// Returns `None` when the score is undefined: fewer than two distinct
/// labels, as many labels as points, or mismatched input lengths. Members of
/// singleton clusters contribute 0.
pub fn silhouette_score(vectors: &[Vec<f32>], labels: &[usize]) -> Option<f64> {
    let n = vectors.len();
    if n != labels.len() {
        return None;
    }
    let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
    for &l in labels {
        *sizes.entry(l).or_insert(0) += 1;
    }
    if sizes.len() < 2 || sizes.len() >= n {
        return None;
    }

    let mut total = 0.0f64;
    for i in 0..n {
        let own = labels[i];
        if sizes[&own] == 1 {
            continue;
        }
        let mut sums: BTreeMap<usize, f64> = BTreeMap::new();
        for j in 0..n {
            if i == j {
                continue;
            }
            let d = (squared_euclidean(&vectors[i], &vectors[j]) as f64).sqrt();
            *sums.entry(labels[j]).or_insert(0.0) += d;
        }
        let a = sums.get(&own).copied().unwrap_or(0.0) / (sizes[&own] - 1) as f64;
        let b = sums
            .iter()
            .filter(|(l, _)| **l != own)
            .map(|(l, s)| s / sizes[l] as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }

    Some(total / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> (Vec<Vec<f32>>, Vec<usize>) {
        let vectors = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.0, 0.1],
            vec![10.0, 10.0],
            vec![10.1, 10.0],
            vec![10.0, 10.1],
        ];
        (vectors, vec![0, 0, 0, 1, 1, 1])
    }

    #[test]
    fn test_silhouette_well_separated() {
        let (v, l) = blobs();
        let s = silhouette_score(&v, &l).unwrap();
        assert!(s > 0.9, "score {s}");
    }

    #[test]
    fn test_silhouette_bad_assignment_is_lower() {
        let (v, _) = blobs();
        let good = silhouette_score(&v, &[0, 0, 0, 1, 1, 1]).unwrap();
        let bad = silhouette_score(&v, &[0, 1, 0, 1, 0, 1]).unwrap();
        assert!(bad < good);
    }

    #[test]
    fn test_silhouette_undefined_cases() {
        let (v, _) = blobs();
        assert_eq!(silhouette_score(&v, &[0; 6]), None);
        assert_eq!(silhouette_score(&v, &[0, 1, 2, 3, 4, 5]), None);
        assert_eq!(silhouette_score(&v, &[0, 1]), None);
    }

    #[test]
    fn test_inertia_sweep_decreases() {
        let (v, _) = blobs();
        let sweep = inertia_sweep(&v, 1..=10, &Kmeans::new()).unwrap();
        let ks: Vec<usize> = sweep.iter().map(|(k, _)| *k).collect();
        assert_eq!(ks, vec![1, 2, 3, 4, 5, 6]);
        assert!(sweep[1].1 < sweep[0].1);
        assert!(sweep[5].1.abs() < 1e-6);
    }
}
