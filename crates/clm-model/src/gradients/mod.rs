// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Hand-derived gradients of the sentence's negative log-likelihood with
//! respect to the three trainable tensors.
//!
//! Each pass re-walks the span/split structure of a finished
//! [`CompositionalScore`], chains local derivatives through the
//! composition function, subtracts the expectation correction implied by
//! the model's own split distribution, and divides by the root partition
//! function. A pass whose output is numerically corrupt is zeroed for
//! that sentence and logged; the rest of the batch proceeds.

mod embedding;
mod energy;
mod leaf;
mod weight;

pub use leaf::LeafExpectations;

use crate::error::{ModelError, ModelResult};
use crate::model::CompositionModel;
use crate::parallel::Execution;
use crate::scorer::CompositionalScore;
use clm_tensor::{Tensor, TensorResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Sparse gradient over the embedding matrix: one d-vector per
/// vocabulary column touched by the sentence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmbeddingGradient {
    dimensions: usize,
    columns: HashMap<usize, Tensor>,
}

impl EmbeddingGradient {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            columns: HashMap::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Adds a column contribution, merging with any existing entry.
    pub fn add_column(&mut self, index: usize, column: &Tensor) -> TensorResult<()> {
        column.expect_column(self.dimensions)?;
        match self.columns.get_mut(&index) {
            Some(existing) => existing.add_scaled(column, 1.0),
            None => {
                self.columns.insert(index, column.clone());
                Ok(())
            }
        }
    }

    pub fn column(&self, index: usize) -> Option<&Tensor> {
        self.columns.get(&index)
    }

    pub fn columns(&self) -> impl Iterator<Item = (usize, &Tensor)> {
        self.columns.iter().map(|(&i, t)| (i, t))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Merges another sparse gradient into this one.
    pub fn add(&mut self, other: &EmbeddingGradient) -> TensorResult<()> {
        for (index, column) in other.columns() {
            self.add_column(index, column)?;
        }
        Ok(())
    }

    pub fn scale_inplace(&mut self, factor: f64) {
        for column in self.columns.values_mut() {
            column.scale_inplace(factor);
        }
    }

    pub fn clear(&mut self) {
        self.columns.clear();
    }

    pub fn has_non_finite(&self) -> bool {
        self.columns.values().any(Tensor::has_non_finite)
    }

    pub fn max_abs(&self) -> f64 {
        self.columns
            .values()
            .fold(0.0_f64, |acc, t| acc.max(t.max_abs()))
    }

    pub fn clamp_abs(&mut self, bound: f64) {
        for column in self.columns.values_mut() {
            column.clamp_abs(bound);
        }
    }

    pub fn squared_l2_norm(&self) -> f64 {
        self.columns.values().map(Tensor::squared_l2_norm).sum()
    }
}

/// One gradient per trainable tensor, shaped exactly like the tensors.
#[derive(Clone, Debug, PartialEq)]
pub struct GradientSet {
    w: Tensor,
    u: Tensor,
    x: EmbeddingGradient,
}

impl GradientSet {
    pub fn zeros(dimensions: usize) -> TensorResult<Self> {
        Ok(Self {
            w: Tensor::zeros(dimensions, 2 * dimensions)?,
            u: Tensor::zeros(dimensions, 1)?,
            x: EmbeddingGradient::new(dimensions),
        })
    }

    pub fn from_parts(w: Tensor, u: Tensor, x: EmbeddingGradient) -> Self {
        Self { w, u, x }
    }

    pub fn w(&self) -> &Tensor {
        &self.w
    }

    pub fn u(&self) -> &Tensor {
        &self.u
    }

    pub fn x(&self) -> &EmbeddingGradient {
        &self.x
    }

    /// Elementwise sum with another gradient set of the same shapes.
    pub fn add(&mut self, other: &GradientSet) -> TensorResult<()> {
        self.w.add_scaled(&other.w, 1.0)?;
        self.u.add_scaled(&other.u, 1.0)?;
        self.x.add(&other.x)
    }

    /// Elementwise scale, used to apply learning rates and batch
    /// averaging.
    pub fn scale(&mut self, factor: f64) {
        self.w.scale_inplace(factor);
        self.u.scale_inplace(factor);
        self.x.scale_inplace(factor);
    }

    /// Deterministic zeroing.
    pub fn clear(&mut self) {
        self.w.fill(0.0);
        self.u.fill(0.0);
        self.x.clear();
    }

    pub fn has_non_finite(&self) -> bool {
        self.w.has_non_finite() || self.u.has_non_finite() || self.x.has_non_finite()
    }

    pub fn squared_l2_norm(&self) -> f64 {
        self.w.squared_l2_norm() + self.u.squared_l2_norm() + self.x.squared_l2_norm()
    }
}

/// Numerical-stability policy for raw gradients: a tensor with any
/// non-finite entry, or any entry above `reject_above`, is zeroed for the
/// sentence; surviving tensors are clamped per element to
/// `[-clamp_abs, clamp_abs]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradientClamp {
    pub reject_above: f64,
    pub clamp_abs: f64,
}

impl Default for GradientClamp {
    fn default() -> Self {
        Self {
            reject_above: 1e6,
            clamp_abs: 100.0,
        }
    }
}

impl GradientClamp {
    fn sanitize_tensor(&self, label: &str, sentence: usize, tensor: &mut Tensor) {
        if tensor.has_non_finite() || tensor.max_abs() > self.reject_above {
            warn!(
                sentence,
                gradient = label,
                "gradient contains NaN/Inf or oversized entries; zeroing for this sentence"
            );
            tensor.fill(0.0);
            return;
        }
        tensor.clamp_abs(self.clamp_abs);
    }

    fn sanitize_embedding(&self, sentence: usize, gradient: &mut EmbeddingGradient) {
        if gradient.has_non_finite() || gradient.max_abs() > self.reject_above {
            warn!(
                sentence,
                gradient = "x",
                "gradient contains NaN/Inf or oversized entries; zeroing for this sentence"
            );
            gradient.clear();
            return;
        }
        gradient.clamp_abs(self.clamp_abs);
    }
}

/// Runs the three gradient passes against a finished score. The root
/// partition function must be positive; a zero is the caller's fatal
/// error, because every formula divides by it.
pub fn compute_gradients(
    model: &CompositionModel,
    score: &CompositionalScore,
    leaf: &LeafExpectations,
    execution: Execution<'_>,
    clamp: &GradientClamp,
) -> ModelResult<GradientSet> {
    let z = score.root_inside();
    if !z.is_finite() || z <= 0.0 {
        return Err(ModelError::ZeroPartition {
            sentence: score.sentence().id(),
            len: score.len(),
        });
    }

    let sentence = score.sentence().id();
    let mut w = weight::compute(model, score, execution)?;
    let mut u = energy::compute(model, score, leaf, execution)?;
    let mut x = embedding::compute(model, score, leaf, execution)?;

    clamp.sanitize_tensor("w", sentence, &mut w);
    clamp.sanitize_tensor("u", sentence, &mut u);
    clamp.sanitize_embedding(sentence, &mut x);

    let set = GradientSet::from_parts(w, u, x);
    debug!(
        sentence,
        w_norm = set.w().squared_l2_norm().sqrt(),
        u_norm = set.u().squared_l2_norm().sqrt(),
        x_norm = set.x().squared_l2_norm().sqrt(),
        "computed sentence gradients"
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_gradient_merges_columns() {
        let mut g = EmbeddingGradient::new(2);
        let a = Tensor::column_vector(vec![1.0, 2.0]).unwrap();
        let b = Tensor::column_vector(vec![0.5, -1.0]).unwrap();
        g.add_column(3, &a).unwrap();
        g.add_column(3, &b).unwrap();
        g.add_column(7, &b).unwrap();
        assert_eq!(g.len(), 2);
        assert_eq!(g.column(3).unwrap().data(), &[1.5, 1.0]);
        assert_eq!(g.column(7).unwrap().data(), &[0.5, -1.0]);
    }

    #[test]
    fn gradient_set_add_scale_clear() {
        let mut a = GradientSet::zeros(2).unwrap();
        let mut b = GradientSet::zeros(2).unwrap();
        b.w.set(0, 0, 2.0);
        b.u.set(1, 0, -4.0);
        b.x
            .add_column(1, &Tensor::column_vector(vec![1.0, 1.0]).unwrap())
            .unwrap();
        a.add(&b).unwrap();
        a.scale(0.5);
        assert_eq!(a.w().get(0, 0), 1.0);
        assert_eq!(a.u().get(1, 0), -2.0);
        assert_eq!(a.x().column(1).unwrap().data(), &[0.5, 0.5]);
        a.clear();
        assert_eq!(a.w().max_abs(), 0.0);
        assert_eq!(a.u().max_abs(), 0.0);
        assert!(a.x().is_empty());
    }

    #[test]
    fn clamp_zeroes_corrupt_tensors_and_clamps_large_ones() {
        let clamp = GradientClamp::default();
        let mut corrupt = Tensor::from_vec(1, 2, vec![f64::NAN, 1.0]).unwrap();
        clamp.sanitize_tensor("w", 0, &mut corrupt);
        assert_eq!(corrupt.data(), &[0.0, 0.0]);

        let mut oversized = Tensor::from_vec(1, 2, vec![2e6, 1.0]).unwrap();
        clamp.sanitize_tensor("w", 0, &mut oversized);
        assert_eq!(oversized.data(), &[0.0, 0.0]);

        let mut large = Tensor::from_vec(1, 2, vec![250.0, -1.0]).unwrap();
        clamp.sanitize_tensor("w", 0, &mut large);
        assert_eq!(large.data(), &[100.0, -1.0]);
    }
}
