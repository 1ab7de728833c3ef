// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The continuous composition model: pure functions from child vectors
//! to a parent vector and from a vector to a scalar energy, plus the
//! analytic derivatives of both.
//!
//! The composition nonlinearity is a sigmoid, the energy nonlinearity is
//! the identity; both are confined to this module so the choice can
//! change in one place. The model carries no state beyond its parameter
//! tensors and is safe for concurrent read-only use by worker threads;
//! parameter writes belong to the optimizer, between scoring calls.

use crate::error::{ModelError, ModelResult};
use crate::params::Parameters;
use clm_grammar::Word;
use clm_tensor::Tensor;

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[inline]
fn sigmoid_derivative(x: f64) -> f64 {
    let s = sigmoid(x);
    s * (1.0 - s)
}

/// Owns the trainable parameter tensors and evaluates composition and
/// energy at chart cells.
#[derive(Clone, Debug)]
pub struct CompositionModel {
    params: Parameters,
}

impl CompositionModel {
    pub fn new(params: Parameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    pub fn dimensions(&self) -> usize {
        self.params.dimensions()
    }

    pub fn vocab_size(&self) -> usize {
        self.params.vocab_size()
    }

    /// Continuous-space embedding of a word: column `word.index()` of
    /// the embedding matrix as a d x 1 vector.
    pub fn word2vec(&self, word: &Word) -> ModelResult<Tensor> {
        let index = word.index();
        if index >= self.params.vocab_size() {
            return Err(ModelError::WordIndex {
                index,
                vocab_size: self.params.vocab_size(),
            });
        }
        Ok(self.params.x().column(index)?)
    }

    fn pre_activation(&self, child1: &Tensor, child2: &Tensor) -> ModelResult<Tensor> {
        let d = self.params.dimensions();
        child1.expect_column(d)?;
        child2.expect_column(d)?;
        let stacked = Tensor::cat_rows(&[child1, child2])?;
        Ok(self.params.w().matmul(&stacked)?)
    }

    /// Composes a parent vector from two children:
    /// `sigmoid(W . [child1; child2])`.
    pub fn compose(&self, child1: &Tensor, child2: &Tensor) -> ModelResult<Tensor> {
        let mut pre = self.pre_activation(child1, child2)?;
        for value in pre.data_mut() {
            *value = sigmoid(*value);
        }
        Ok(pre)
    }

    /// Elementwise derivative of the composition nonlinearity at the
    /// pre-activation; the factor every downstream chain-rule step uses.
    pub fn compose_derivative(&self, child1: &Tensor, child2: &Tensor) -> ModelResult<Tensor> {
        let mut pre = self.pre_activation(child1, child2)?;
        for value in pre.data_mut() {
            *value = sigmoid_derivative(*value);
        }
        Ok(pre)
    }

    /// Energy of a leaf node: `g(u^T . node)` with identity `g`.
    pub fn energy(&self, node: &Tensor) -> ModelResult<f64> {
        node.expect_column(self.params.dimensions())?;
        Ok(self.params.u().dot(node)?)
    }

    /// Energy of a composed node. The children participate only through
    /// the shape contract; the value differs from [`Self::energy`] only
    /// in how `node` was produced.
    pub fn energy_comp(
        &self,
        node: &Tensor,
        child1: &Tensor,
        child2: &Tensor,
    ) -> ModelResult<f64> {
        let d = self.params.dimensions();
        child1.expect_column(d)?;
        child2.expect_column(d)?;
        self.energy(node)
    }

    /// Derivative of the energy nonlinearity at the pre-activation
    /// (identity `g`, so 1.0).
    pub fn energy_derivative(&self, node: &Tensor) -> ModelResult<f64> {
        node.expect_column(self.params.dimensions())?;
        Ok(1.0)
    }

    /// Composed-node form of [`Self::energy_derivative`].
    pub fn energy_comp_derivative(
        &self,
        node: &Tensor,
        child1: &Tensor,
        child2: &Tensor,
    ) -> ModelResult<f64> {
        let d = self.params.dimensions();
        child1.expect_column(d)?;
        child2.expect_column(d)?;
        self.energy_derivative(node)
    }

    /// Unnormalized leaf weight `exp(-energy(node))`.
    pub fn leaf_score(&self, node: &Tensor) -> ModelResult<f64> {
        Ok((-self.energy(node)?).exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(d: usize, v: usize) -> CompositionModel {
        CompositionModel::new(Parameters::new(d, v, 11).unwrap())
    }

    #[test]
    fn word2vec_returns_embedding_column() {
        let m = model(3, 4);
        let w = Word::new("w", 2);
        let vec = m.word2vec(&w).unwrap();
        assert_eq!(vec.shape(), (3, 1));
        assert_eq!(vec.data(), m.params().x().column(2).unwrap().data());
    }

    #[test]
    fn word2vec_rejects_out_of_range_index() {
        let m = model(3, 4);
        assert!(matches!(
            m.word2vec(&Word::new("oov", 4)),
            Err(ModelError::WordIndex {
                index: 4,
                vocab_size: 4
            })
        ));
    }

    #[test]
    fn compose_rejects_wrong_child_shapes() {
        let m = model(3, 4);
        let ok = Tensor::zeros(3, 1).unwrap();
        let bad = Tensor::zeros(2, 1).unwrap();
        assert!(m.compose(&ok, &bad).is_err());
        assert!(m.compose(&bad, &ok).is_err());
    }

    #[test]
    fn compose_with_zero_weights_saturates_at_half() {
        let params = Parameters::from_parts(
            Tensor::zeros(2, 4).unwrap(),
            Tensor::zeros(2, 1).unwrap(),
            Tensor::zeros(2, 3).unwrap(),
        )
        .unwrap();
        let m = CompositionModel::new(params);
        let c = Tensor::column_vector(vec![0.4, -0.4]).unwrap();
        let parent = m.compose(&c, &c).unwrap();
        for &v in parent.data() {
            assert!((v - 0.5).abs() < 1e-12);
        }
        // sigma'(0) = 1/4 at the zero pre-activation.
        let dc = m.compose_derivative(&c, &c).unwrap();
        for &v in dc.data() {
            assert!((v - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn energy_is_linear_in_u() {
        let params = Parameters::from_parts(
            Tensor::zeros(2, 4).unwrap(),
            Tensor::column_vector(vec![2.0, -1.0]).unwrap(),
            Tensor::zeros(2, 3).unwrap(),
        )
        .unwrap();
        let m = CompositionModel::new(params);
        let node = Tensor::column_vector(vec![0.5, 0.25]).unwrap();
        assert!((m.energy(&node).unwrap() - 0.75).abs() < 1e-12);
        assert!((m.energy_derivative(&node).unwrap() - 1.0).abs() < 1e-12);
        assert!((m.leaf_score(&node).unwrap() - (-0.75_f64).exp()).abs() < 1e-12);
    }
}
