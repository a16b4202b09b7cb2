//! Exact L2 nearest-neighbour index over a dense row-major matrix.

use super::RetrievalError;

/// Brute-force index. Distances are squared Euclidean; the ranking is the
/// same as true L2 and never cosine.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Rebuild from a flat row-major buffer (as stored on disk).
    pub fn from_flat(dimension: usize, data: Vec<f32>) -> Result<Self, RetrievalError> {
        if dimension == 0 || data.len() % dimension != 0 {
            return Err(RetrievalError::CorruptCache(format!(
                "{} values do not form rows of dimension {dimension}",
                data.len()
            )));
        }
        Ok(Self { dimension, data })
    }

    pub fn add(&mut self, vector: &[f32]) -> Result<(), RetrievalError> {
        if vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Row-major vector storage.
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// `(position, squared distance)` of the `k` nearest rows, nearest first.
    /// Equal distances keep corpus order. `k` is clamped to `len()`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, RetrievalError> {
        if query.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimension)
            .map(|row| squared_l2(query, row))
            .enumerate()
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
