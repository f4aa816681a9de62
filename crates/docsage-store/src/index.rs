//! In-memory vector index: a row-major embedding matrix plus a metadata array
//! of identical length and ordering.
//!
//! Every mutation validates the whole input before touching either array, so
//! `matrix.nrows() == metadata.len()` holds after any call, successful or not.

use std::cmp::Ordering;
use std::collections::HashSet;

use docsage_core::{Error, Metric, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::embedding::{normalize_in_place, normalized};
use crate::types::{ChunkMetadata, IndexStats, SearchHit};

#[derive(Debug, Clone)]
pub struct VectorIndex {
    metric: Metric,
    /// Fixed by the first insertion unless configured up front.
    dimension: Option<usize>,
    /// Shape (N, dimension). Rows are unit-norm under `Metric::InnerProduct`.
    matrix: Array2<f32>,
    metadata: Vec<ChunkMetadata>,
}

impl VectorIndex {
    /// Empty index whose dimension is fixed by the first `add`.
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            dimension: None,
            matrix: Array2::zeros((0, 0)),
            metadata: Vec::new(),
        }
    }

    /// Empty index with a dimension fixed up front.
    pub fn with_dimension(metric: Metric, dimension: usize) -> Self {
        Self {
            metric,
            dimension: Some(dimension),
            matrix: Array2::zeros((0, dimension)),
            metadata: Vec::new(),
        }
    }

    /// Rebuild from persisted parts. Rows are taken as stored.
    pub(crate) fn from_parts(
        metric: Metric,
        dimension: Option<usize>,
        matrix: Array2<f32>,
        metadata: Vec<ChunkMetadata>,
    ) -> Result<Self> {
        if matrix.nrows() != metadata.len() {
            return Err(Error::CorruptIndex(format!(
                "{} vectors but {} metadata entries",
                matrix.nrows(),
                metadata.len()
            )));
        }
        if let Some(dim) = dimension {
            if matrix.ncols() != dim {
                return Err(Error::CorruptIndex(format!(
                    "matrix has {} columns, manifest says {}",
                    matrix.ncols(),
                    dim
                )));
            }
        } else if matrix.nrows() > 0 {
            return Err(Error::CorruptIndex("vectors present without a dimension".into()));
        }
        Ok(Self {
            metric,
            dimension,
            matrix,
            metadata,
        })
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn contains_document(&self, document_id: &str) -> bool {
        self.metadata.iter().any(|m| m.document_id == document_id)
    }

    pub fn metadata(&self) -> &[ChunkMetadata] {
        &self.metadata
    }

    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        self.matrix.view()
    }

    /// Stored vector at `position` (normalized under inner product).
    pub fn vector(&self, position: usize) -> Option<Array1<f32>> {
        (position < self.matrix.nrows()).then(|| self.matrix.row(position).to_owned())
    }

    /// Append a batch. The batch is rejected whole if lengths differ, any
    /// vector has the wrong dimension, or any component is not finite.
    pub fn add(&mut self, vectors: &[Array1<f32>], metadata: Vec<ChunkMetadata>) -> Result<usize> {
        if vectors.len() != metadata.len() {
            return Err(Error::LengthMismatch {
                vectors: vectors.len(),
                metadata: metadata.len(),
            });
        }
        if vectors.is_empty() {
            return Ok(0);
        }

        let dim = self.dimension.unwrap_or_else(|| vectors[0].len());
        if dim == 0 {
            return Err(Error::MalformedInput("zero-length embedding".into()));
        }
        for v in vectors {
            if v.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    actual: v.len(),
                });
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(Error::MalformedInput("non-finite embedding component".into()));
            }
        }

        let mut batch = Array2::<f32>::zeros((vectors.len(), dim));
        for (mut row, v) in batch.rows_mut().into_iter().zip(vectors) {
            row.assign(v);
            if self.metric == Metric::InnerProduct {
                normalize_in_place(row);
            }
        }

        self.append_rows(batch, metadata)
    }

    /// Up to `k` nearest entries, best first. Equal scores keep insertion order.
    pub fn search(&self, query: &Array1<f32>, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }
        let dim = self.matrix.ncols();
        if query.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(Error::MalformedInput("non-finite query component".into()));
        }

        let scores: Vec<f32> = match self.metric {
            Metric::InnerProduct => {
                let q = normalized(query);
                self.matrix
                    .dot(&q)
                    .iter()
                    .map(|s| s.clamp(-1.0, 1.0))
                    .collect()
            }
            Metric::L2 => self
                .matrix
                .rows()
                .into_iter()
                .map(|row| {
                    let diff = &row - query;
                    diff.dot(&diff)
                })
                .collect(),
        };

        let metric = self.metric;
        let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| rank_order(metric, a, b));
        ranked.truncate(k);

        Ok(ranked
            .into_iter()
            .map(|(position, score)| SearchHit {
                position,
                score,
                metadata: self.metadata[position].clone(),
            })
            .collect())
    }

    /// Append every entry of `other`. Both must share metric and dimension.
    pub fn merge(&mut self, other: &VectorIndex) -> Result<usize> {
        if self.metric != other.metric {
            return Err(Error::IncompatibleIndex(format!(
                "cannot merge {} index into {} index",
                other.metric.as_str(),
                self.metric.as_str()
            )));
        }
        if let (Some(expected), Some(actual)) = (self.dimension, other.dimension) {
            if expected != actual {
                return Err(Error::DimensionMismatch { expected, actual });
            }
        }
        if other.is_empty() {
            return Ok(0);
        }
        self.append_rows(other.matrix.clone(), other.metadata.clone())
    }

    /// Drop every entry, keeping metric and dimension.
    pub fn clear(&mut self) {
        self.matrix = Array2::zeros((0, self.dimension.unwrap_or(0)));
        self.metadata.clear();
    }

    pub fn stats(&self) -> IndexStats {
        let documents: HashSet<&str> = self.metadata.iter().map(|m| m.filename.as_str()).collect();
        IndexStats {
            vector_count: self.matrix.nrows(),
            metadata_count: self.metadata.len(),
            dimension: self.dimension,
            metric: self.metric,
            document_count: documents.len(),
        }
    }

    /// Rows must already be validated and, for inner product, normalized.
    fn append_rows(&mut self, rows: Array2<f32>, metadata: Vec<ChunkMetadata>) -> Result<usize> {
        let added = rows.nrows();
        if self.dimension.is_none() || self.matrix.nrows() == 0 {
            self.dimension = Some(rows.ncols());
            self.matrix = rows;
        } else {
            self.matrix
                .append(Axis(0), rows.view())
                .map_err(|e| Error::Storage(format!("append failed: {e}")))?;
        }
        self.metadata.extend(metadata);
        Ok(added)
    }
}

fn rank_order(metric: Metric, a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    let primary = match metric {
        Metric::InnerProduct => b.1.total_cmp(&a.1),
        Metric::L2 => a.1.total_cmp(&b.1),
    };
    primary.then(a.0.cmp(&b.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn meta(i: usize, filename: &str) -> ChunkMetadata {
        ChunkMetadata::new(format!("c{i}"), "doc", filename, format!("chunk {i}"), i)
    }

    fn basis(dim: usize, hot: usize) -> Array1<f32> {
        let mut v = Array1::zeros(dim);
        v[hot] = 1.0;
        v
    }

    fn filled(n: usize, dim: usize, metric: Metric) -> VectorIndex {
        let mut index = VectorIndex::new(metric);
        let vectors: Vec<Array1<f32>> = (0..n)
            .map(|i| Array1::from_iter((0..dim).map(|d| ((i * 7 + d * 3) % 11) as f32 + 1.0)))
            .collect();
        let metadata = (0..n).map(|i| meta(i, "a.pdf")).collect();
        index.add(&vectors, metadata).unwrap();
        index
    }

    #[test]
    fn test_add_fixes_dimension() {
        let mut index = VectorIndex::new(Metric::InnerProduct);
        assert_eq!(index.dimension(), None);
        index.add(&[array![1.0, 0.0, 0.0]], vec![meta(0, "a.pdf")]).unwrap();
        assert_eq!(index.dimension(), Some(3));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_dimension_mismatch_rejects_whole_batch() {
        let mut index = filled(3, 4, Metric::InnerProduct);
        let err = index
            .add(
                &[array![1.0, 0.0, 0.0, 0.0], array![1.0, 0.0]],
                vec![meta(3, "a.pdf"), meta(4, "a.pdf")],
            )
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 2 }));
        assert_eq!(index.len(), 3);
        assert_eq!(index.vectors().nrows(), 3);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut index = VectorIndex::new(Metric::InnerProduct);
        let err = index.add(&[array![1.0, 0.0]], Vec::new()).unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { vectors: 1, metadata: 0 }));
        assert!(index.is_empty());
        assert_eq!(index.dimension(), None);
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut index = VectorIndex::new(Metric::L2);
        let err = index.add(&[array![f32::NAN, 1.0]], vec![meta(0, "a.pdf")]).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
        assert!(index.is_empty());
    }

    #[test]
    fn test_repeated_appends_keep_alignment() {
        let mut index = VectorIndex::new(Metric::InnerProduct);
        for batch in 0..6 {
            let vectors: Vec<Array1<f32>> = (0..4).map(|i| basis(8, (batch + i) % 8)).collect();
            let metadata = (0..4).map(|i| meta(batch * 4 + i, "a.pdf")).collect();
            index.add(&vectors, metadata).unwrap();
            let stats = index.stats();
            assert_eq!(stats.vector_count, (batch + 1) * 4);
            assert_eq!(stats.metadata_count, stats.vector_count);
        }
    }

    #[test]
    fn test_identical_query_ranks_first() {
        let index = filled(10, 6, Metric::InnerProduct);
        let query = Array1::from_iter((0..6).map(|d| ((4 * 7 + d * 3) % 11) as f32 + 1.0));
        let hits = index.search(&query, 3).unwrap();
        assert_eq!(hits[0].metadata.chunk_id, "c4");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_identical_query_l2_distance_zero() {
        let index = filled(10, 6, Metric::L2);
        let query = Array1::from_iter((0..6).map(|d| ((2 * 7 + d * 3) % 11) as f32 + 1.0));
        let hits = index.search(&query, 1).unwrap();
        assert_eq!(hits[0].position, 2);
        assert_eq!(hits[0].score, 0.0);
    }

    #[test]
    fn test_k_larger_than_index_returns_all() {
        let index = filled(4, 3, Metric::InnerProduct);
        let hits = index.search(&array![1.0, 1.0, 1.0], 50).unwrap();
        assert_eq!(hits.len(), 4);
        let mut positions: Vec<usize> = hits.iter().map(|h| h.position).collect();
        positions.sort();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        let mut index = VectorIndex::new(Metric::InnerProduct);
        let same = array![0.0, 1.0];
        index
            .add(
                &[same.clone(), array![1.0, 0.0], same.clone(), same.clone()],
                vec![meta(0, "a"), meta(1, "a"), meta(2, "a"), meta(3, "a")],
            )
            .unwrap();
        let hits = index.search(&array![0.0, 2.0], 4).unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(order, vec![0, 2, 3, 1]);
    }

    #[test]
    fn test_empty_index_search_is_empty() {
        let index = VectorIndex::with_dimension(Metric::InnerProduct, 3);
        assert!(index.search(&array![1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = filled(2, 3, Metric::InnerProduct);
        let err = index.search(&array![1.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[test]
    fn test_merge_ten_and_five() {
        let mut a = VectorIndex::new(Metric::InnerProduct);
        let mut b = VectorIndex::new(Metric::InnerProduct);
        a.add(
            &(0..10).map(|i| basis(16, i)).collect::<Vec<_>>(),
            (0..10).map(|i| meta(i, "a.pdf")).collect(),
        )
        .unwrap();
        b.add(
            &(10..15).map(|i| basis(16, i)).collect::<Vec<_>>(),
            (10..15).map(|i| meta(i, "b.pdf")).collect(),
        )
        .unwrap();

        assert_eq!(a.merge(&b).unwrap(), 5);
        assert_eq!(a.len(), 15);
        assert_eq!(a.stats().document_count, 2);

        let from_a = a.search(&basis(16, 3), 1).unwrap();
        let from_b = a.search(&basis(16, 12), 1).unwrap();
        assert_eq!(from_a[0].metadata.filename, "a.pdf");
        assert_eq!(from_b[0].metadata.filename, "b.pdf");
    }

    #[test]
    fn test_merge_dimension_mismatch() {
        let mut a = filled(3, 4, Metric::InnerProduct);
        let b = filled(3, 5, Metric::InnerProduct);
        let err = a.merge(&b).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 5 }));
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_merge_metric_mismatch() {
        let mut a = filled(2, 4, Metric::InnerProduct);
        let b = filled(2, 4, Metric::L2);
        assert!(matches!(a.merge(&b), Err(Error::IncompatibleIndex(_))));
    }

    #[test]
    fn test_merge_into_unsized_index() {
        let mut a = VectorIndex::new(Metric::InnerProduct);
        let b = filled(5, 4, Metric::InnerProduct);
        a.merge(&b).unwrap();
        assert_eq!(a.dimension(), Some(4));
        assert_eq!(a.len(), 5);
    }

    #[test]
    fn test_clear_keeps_dimension() {
        let mut index = filled(5, 4, Metric::InnerProduct);
        index.clear();
        assert!(index.is_empty());
        assert_eq!(index.dimension(), Some(4));
        let err = index.add(&[array![1.0, 2.0]], vec![meta(0, "a")]).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 2 }));
    }

    #[test]
    fn test_no_silent_dedup() {
        let mut index = VectorIndex::new(Metric::InnerProduct);
        let v = array![1.0, 2.0, 3.0];
        index.add(&[v.clone()], vec![meta(0, "a")]).unwrap();
        index.add(&[v], vec![meta(0, "a")]).unwrap();
        assert_eq!(index.len(), 2);
    }
}
