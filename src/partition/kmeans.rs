//! Seeded k-means over `linfa-clustering`.
//!
//! k-means++ initialization and Lloyd iterations under euclidean distance,
//! with several restarts of which the lowest-inertia result is kept. The
//! restarts draw from one ChaCha stream seeded from `seed`, so identical
//! input always yields identical assignments.

use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::{KMeans, KMeansError};
use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::{PartitionError, PartitionResult, Partitioner};

/// Result of a k-means fit.
#[derive(Debug, Clone, PartialEq)]
pub struct KmeansFit {
    /// Group index per input vector
    pub assignments: Vec<usize>,

    /// Final centroid per group
    pub centroids: Vec<Vec<f32>>,

    /// Mean squared distance of vectors to their nearest centroid
    pub inertia: f64,
}

/// k-means configuration.
#[derive(Debug, Clone)]
pub struct Kmeans {
    seed: u64,
    n_init: usize,
    max_iter: usize,
    tolerance: f64,
}

impl Default for Kmeans {
    fn default() -> Self {
        Self {
            seed: 42,
            n_init: 10,
            max_iter: 300,
            tolerance: 1e-4,
        }
    }
}

impl Kmeans {
    /// k-means with seed 42, 10 restarts and a 300-iteration cap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the number of restarts.
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init;
        self
    }

    /// Set the per-restart iteration cap.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the convergence threshold on centroid movement.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Fit `k` groups and return assignments, centroids and inertia.
    ///
    /// # Errors
    /// Returns `PartitionError` for empty input, `k == 0`, `k` greater than
    /// the number of vectors, inconsistent or non-finite vectors, or when the
    /// kept restart does not converge within the iteration cap.
    pub fn fit(&self, vectors: &[Vec<f32>], k: usize) -> PartitionResult<KmeansFit> {
        self.validate(vectors, k)?;

        let records = to_array(vectors);
        let dataset = DatasetBase::from(records.clone());
        let rng = ChaCha8Rng::seed_from_u64(self.seed);

        let model = KMeans::params_with_rng(k, rng)
            .n_runs(self.n_init)
            .max_n_iterations(self.max_iter as u64)
            .tolerance(self.tolerance)
            .fit(&dataset)
            .map_err(|e: KMeansError| PartitionError::Backend(e.to_string()))?;

        let assignments: Vec<usize> = model.predict(&records).iter().copied().collect();
        let centroids: Vec<Vec<f32>> = model
            .centroids()
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|&x| x as f32).collect())
            .collect();
        let inertia = model.inertia();
        debug!(k, runs = self.n_init, inertia, "k-means fit");

        Ok(KmeansFit {
            assignments,
            centroids,
            inertia,
        })
    }

    fn validate(&self, vectors: &[Vec<f32>], k: usize) -> PartitionResult<()> {
        if self.n_init == 0 {
            return Err(PartitionError::InvalidParameter {
                name: "n_init",
                message: "must be at least 1",
            });
        }
        if self.max_iter == 0 {
            return Err(PartitionError::InvalidParameter {
                name: "max_iter",
                message: "must be at least 1",
            });
        }
        if self.tolerance.is_nan() || self.tolerance <= 0.0 {
            return Err(PartitionError::InvalidParameter {
                name: "tolerance",
                message: "must be positive",
            });
        }
        if k == 0 {
            return Err(PartitionError::InvalidParameter {
                name: "k",
                message: "must be at least 1",
            });
        }
        if vectors.is_empty() {
            return Err(PartitionError::EmptyInput);
        }
        if k > vectors.len() {
            return Err(PartitionError::InvalidClusterCount {
                requested: k,
                n_items: vectors.len(),
            });
        }
        let expected = vectors[0].len();
        for (index, v) in vectors.iter().enumerate() {
            if v.len() != expected {
                return Err(PartitionError::DimensionMismatch {
                    expected,
                    found: v.len(),
                });
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(PartitionError::NonFinite { index });
            }
        }
        Ok(())
    }
}

impl Partitioner for Kmeans {
    fn partition(&self, vectors: &[Vec<f32>], k: usize) -> PartitionResult<Vec<usize>> {
        self.fit(vectors, k).map(|fit| fit.assignments)
    }
}

/// Dense `n x dim` matrix; rows must already share one length.
fn to_array(vectors: &[Vec<f32>]) -> Array2<f64> {
    let dim = vectors.first().map_or(0, Vec::len);
    Array2::from_shape_fn((vectors.len(), dim), |(i, j)| f64::from(vectors[i][j]))
}
