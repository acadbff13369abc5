//! Vector partitioning.
//!
//! A [`Partitioner`] assigns every input vector to exactly one of `k` groups.
//! The consolidator only depends on this trait; [`Kmeans`] is the
//! implementation used by the pipeline.

mod kmeans;

use thiserror::Error;

pub use kmeans::{Kmeans, KmeansFit};

/// Errors returned by partitioning.
#[derive(Debug, Error, PartialEq)]
pub enum PartitionError {
    /// No vectors to partition
    #[error("empty input")]
    EmptyInput,

    /// Invalid parameter value
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Human-readable explanation
        message: &'static str,
    },

    /// Requested group count is incompatible with the data
    #[error("invalid cluster count: requested {requested}, but input has {n_items} vectors")]
    InvalidClusterCount {
        /// Requested number of groups
        requested: usize,
        /// Number of input vectors
        n_items: usize,
    },

    /// Vectors have inconsistent dimensionality
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Dimensionality of the first vector
        expected: usize,
        /// Offending dimensionality
        found: usize,
    },

    /// A vector contains NaN or infinity
    #[error("non-finite value in vector {index}")]
    NonFinite {
        /// Position of the offending vector
        index: usize,
    },

    /// Centroids were still moving when the iteration cap was reached
    #[error("did not converge within {max_iter} iterations")]
    NotConverged {
        /// Iteration cap that was hit
        max_iter: usize,
    },

    /// Failure reported by the clustering backend
    #[error("k-means backend: {0}")]
    Backend(String),
}

/// Result type for partitioning.
pub type PartitionResult<T> = Result<T, PartitionError>;

/// Hard partitioning of vectors into a requested number of groups.
pub trait Partitioner: Send + Sync {
    /// Assign each vector a group index in `0..k`.
    ///
    /// Implementations must be deterministic for identical input and fail,
    /// rather than degrade, when `k` exceeds the number of vectors.
    fn partition(&self, vectors: &[Vec<f32>], k: usize) -> PartitionResult<Vec<usize>>;
}

#[inline]
pub(crate) fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Element-wise mean of a set of vectors, or `None` for an empty set.
pub fn centroid<'a, I>(vectors: I, dimension: usize) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a Vec<f32>>,
{
    let mut sum = vec![0.0f64; dimension];
    let mut count = 0usize;
    for v in vectors {
        for (s, x) in sum.iter_mut().zip(v.iter()) {
            *s += *x as f64;
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(sum.into_iter().map(|s| (s / count as f64) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_squared_euclidean() {
        assert_eq!(squared_euclidean(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
    }

    #[test]
    fn test_centroid() {
        let vs = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert_eq!(centroid(&vs, 2), Some(vec![0.5, 0.5]));
        let empty: Vec<Vec<f32>> = Vec::new();
        assert_eq!(centroid(&empty, 2), None);
    }
}
