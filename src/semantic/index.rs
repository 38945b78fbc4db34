//! In-memory vector index with exact Euclidean nearest-neighbor search.
//!
//! Vectors live in one flat buffer in insertion order; a vector's position in
//! that order (its ordinal) is the only key. Search is a full linear scan, so
//! results are exact. An approximate index can replace this type as long as it
//! keeps `add`/`search` semantics.

use rayon::prelude::*;
use std::cmp::Ordering;

/// One search hit: the ordinal of a stored vector and its squared L2 distance
/// to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub ordinal: usize,
    pub distance: f32,
}

/// Append-only store of fixed-dimension vectors.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimensions: usize,
    count: usize,
    /// `count * dimensions` components, row-major
    data: Vec<f32>,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self::with_capacity(dimensions, 0)
    }

    /// Create an index with room for `capacity` vectors.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            dimensions,
            count: 0,
            data: Vec::with_capacity(dimensions * capacity),
        }
    }

    /// Rebuild an index from its flat representation.
    pub fn from_flat(dimensions: usize, data: Vec<f32>) -> Result<Self, IndexError> {
        if dimensions == 0 {
            return Err(IndexError::ZeroDimensions);
        }
        if data.len() % dimensions != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                got: data.len() % dimensions,
            });
        }

        Ok(Self {
            dimensions,
            count: data.len() / dimensions,
            data,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Vector stored at `ordinal`.
    pub fn get(&self, ordinal: usize) -> Option<&[f32]> {
        if ordinal >= self.count {
            return None;
        }
        let start = ordinal * self.dimensions;
        Some(&self.data[start..start + self.dimensions])
    }

    /// All components in ordinal order.
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// Append vectors in order.
    ///
    /// Every vector is checked before anything is appended, so a mismatch
    /// anywhere in the batch leaves the index untouched.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        if self.dimensions == 0 {
            return Err(IndexError::ZeroDimensions);
        }

        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: bad.len(),
            });
        }

        if let Some(position) = vectors.iter().position(|v| !all_finite(v)) {
            return Err(IndexError::NonFinite { position });
        }

        self.data.reserve(vectors.len() * self.dimensions);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        self.count += vectors.len();

        Ok(())
    }

    /// The `min(k, len)` stored vectors closest to `query`, nearest first.
    ///
    /// Equal distances are ordered by ascending ordinal.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        if !all_finite(query) {
            return Err(IndexError::NonFinite { position: 0 });
        }

        if self.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .par_chunks_exact(self.dimensions)
            .enumerate()
            .map(|(ordinal, vector)| Neighbor {
                ordinal,
                distance: squared_l2(query, vector),
            })
            .collect();

        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, nearest_first);
            scored.truncate(k);
        }
        scored.sort_unstable_by(nearest_first);

        Ok(scored)
    }

    /// Drop every vector at or after `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        if len < self.count {
            self.data.truncate(len * self.dimensions);
            self.count = len;
        }
    }
}

/// Distance ascending, then ordinal ascending. Total, so NaN distances sort last.
fn nearest_first(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.ordinal.cmp(&b.ordinal))
}

fn all_finite(vector: &[f32]) -> bool {
    vector.iter().all(|x| x.is_finite())
}

/// Squared Euclidean distance. Callers guarantee equal lengths.
#[inline]
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0;

    let chunks = a.chunks_exact(8);
    let b_chunks = b.chunks_exact(8);
    let remainder_start = a.len() - a.len() % 8;

    for (ac, bc) in chunks.zip(b_chunks) {
        let d0 = ac[0] - bc[0];
        let d1 = ac[1] - bc[1];
        let d2 = ac[2] - bc[2];
        let d3 = ac[3] - bc[3];
        let d4 = ac[4] - bc[4];
        let d5 = ac[5] - bc[5];
        let d6 = ac[6] - bc[6];
        let d7 = ac[7] - bc[7];

        sum += d0 * d0 + d1 * d1 + d2 * d2 + d3 * d3 + d4 * d4 + d5 * d5 + d6 * d6 + d7 * d7;
    }

    for i in remainder_start..a.len() {
        let diff = a[i] - b[i];
        sum += diff * diff;
    }

    sum
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Index dimension must be greater than zero")]
    ZeroDimensions,

    #[error("Vector {position} has NaN or infinite components")]
    NonFinite { position: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(dimensions: usize, vectors: &[Vec<f32>]) -> VectorIndex {
        let mut index = VectorIndex::new(dimensions);
        index.add(vectors).unwrap();
        index
    }

    #[test]
    fn test_new_index() {
        let index = VectorIndex::new(384);
        assert_eq!(index.dimensions(), 384);
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_add_and_get() {
        let index = index_of(3, &[vec![1.0, 0.0, 0.0], vec![0.0, 2.0, 0.0]]);

        assert_eq!(index.len(), 2);
        assert_eq!(index.get(1), Some(&[0.0, 2.0, 0.0][..]));
        assert_eq!(index.get(2), None);
        assert_eq!(index.as_flat().len(), 6);
    }

    #[test]
    fn test_add_dimension_mismatch_is_all_or_nothing() {
        let mut index = index_of(3, &[vec![1.0, 0.0, 0.0]]);

        let result = index.add(&[vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 0.0, 0.0]]);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 3, got: 4 })
        ));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_short_vectors_are_not_padded() {
        let mut index = VectorIndex::new(3);
        let result = index.add(&[vec![1.0, 0.0]]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { got: 2, .. })));
        assert!(index.is_empty());
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = index_of(
            2,
            &[vec![3.0, 0.0], vec![1.0, 0.0], vec![0.0, 0.0], vec![2.0, 0.0]],
        );

        let results = index.search(&[0.0, 0.0], 4).unwrap();
        let ordinals: Vec<usize> = results.iter().map(|n| n.ordinal).collect();
        assert_eq!(ordinals, vec![2, 1, 3, 0]);
        assert_eq!(results[0].distance, 0.0);
        assert_eq!(results[3].distance, 9.0);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_search_ties_break_by_ordinal() {
        let index = index_of(2, &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]]);

        let results = index.search(&[1.0, 0.0], 3).unwrap();
        let ordinals: Vec<usize> = results.iter().map(|n| n.ordinal).collect();
        assert_eq!(ordinals, vec![0, 2, 1]);

        // equidistant from everything
        let results = index.search(&[0.5, 0.5], 3).unwrap();
        let ordinals: Vec<usize> = results.iter().map(|n| n.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn test_search_top_k_with_ties_at_the_cut() {
        let index = index_of(1, &[vec![5.0], vec![1.0], vec![-1.0], vec![1.0], vec![0.0]]);

        let results = index.search(&[0.0], 3).unwrap();
        let ordinals: Vec<usize> = results.iter().map(|n| n.ordinal).collect();
        assert_eq!(ordinals, vec![4, 1, 2]);
    }

    #[test]
    fn test_search_k_larger_than_index() {
        let index = index_of(2, &[vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(index.search(&[1.0, 0.0], 10).unwrap().len(), 2);
    }

    #[test]
    fn test_search_empty_index() {
        let index = VectorIndex::new(3);
        assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_search_query_dimension_mismatch() {
        let index = index_of(3, &[vec![1.0, 0.0, 0.0]]);
        let result = index.search(&[1.0, 0.0], 1);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_non_finite_vectors_are_rejected() {
        let mut index = index_of(3, &[vec![1.0, 0.0, 0.0]]);

        let result = index.add(&[vec![0.0, 1.0, 0.0], vec![f32::NAN, 0.0, 0.0]]);
        assert!(matches!(result, Err(IndexError::NonFinite { position: 1 })));
        assert_eq!(index.len(), 1);

        let result = index.search(&[f32::INFINITY, 0.0, 0.0], 1);
        assert!(matches!(result, Err(IndexError::NonFinite { .. })));
    }

    #[test]
    fn test_squared_l2_matches_naive_sum() {
        let a: Vec<f32> = (0..19).map(|i| i as f32 * 0.5).collect();
        let b: Vec<f32> = (0..19).map(|i| (19 - i) as f32 * 0.25).collect();

        let naive: f32 = a.iter().zip(&b).map(|(x, y)| (x - y) * (x - y)).sum();
        assert!((squared_l2(&a, &b) - naive).abs() < 1e-3);
    }

    #[test]
    fn test_from_flat_and_truncate() {
        let mut index = VectorIndex::from_flat(2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(index.len(), 3);

        index.truncate(1);
        assert_eq!(index.len(), 1);
        assert_eq!(index.as_flat(), &[1.0, 2.0]);

        assert!(VectorIndex::from_flat(4, vec![1.0, 2.0, 3.0]).is_err());
        assert!(matches!(
            VectorIndex::from_flat(0, vec![]),
            Err(IndexError::ZeroDimensions)
        ));
    }
}
