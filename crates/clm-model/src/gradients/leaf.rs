// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Vocabulary-wide leaf expectations.
//!
//! The lexical side of the model normalizes leaf weights over the whole
//! vocabulary, so every gradient pass needs the leaf partition function
//! and expectation terms that do not depend on the sentence. They are
//! computed once per batch into this explicit cache and passed by
//! reference into the gradient passes; call [`LeafExpectations::refresh`]
//! whenever the parameters change.

use crate::error::{ModelError, ModelResult};
use crate::model::CompositionModel;
use clm_tensor::Tensor;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct LeafExpectations {
    z_word: f64,
    probabilities: Vec<f64>,
    expected_energy_gradient: Tensor,
}

impl LeafExpectations {
    /// Walks the vocabulary once: the leaf partition function
    /// `z = sum_v exp(-energy(x_v))`, the normalized leaf probabilities,
    /// and the expected leaf energy-gradient `sum_v P(v) g'(x_v) x_v`.
    pub fn new(model: &CompositionModel) -> ModelResult<Self> {
        let vocab_size = model.vocab_size();
        if vocab_size == 0 {
            return Err(ModelError::EmptyVocabulary);
        }
        let dimensions = model.dimensions();
        let mut weights = Vec::with_capacity(vocab_size);
        let mut z_word = 0.0;
        for index in 0..vocab_size {
            let x = model.params().x().column(index)?;
            let weight = model.leaf_score(&x)?;
            z_word += weight;
            weights.push(weight);
        }
        if !z_word.is_finite() || z_word <= 0.0 {
            return Err(ModelError::LeafPartition { z: z_word });
        }
        let mut probabilities = weights;
        for w in &mut probabilities {
            *w /= z_word;
        }
        let mut expected_energy_gradient = Tensor::zeros(dimensions, 1)?;
        for (index, &p) in probabilities.iter().enumerate() {
            let x = model.params().x().column(index)?;
            let g = model.energy_derivative(&x)?;
            expected_energy_gradient.add_scaled(&x, p * g)?;
        }
        debug!(vocab_size, z_word, "computed leaf expectations");
        Ok(Self {
            z_word,
            probabilities,
            expected_energy_gradient,
        })
    }

    /// Recomputes the cache after a parameter update.
    pub fn refresh(&mut self, model: &CompositionModel) -> ModelResult<()> {
        *self = Self::new(model)?;
        Ok(())
    }

    /// The leaf partition function.
    pub fn z_word(&self) -> f64 {
        self.z_word
    }

    /// Normalized leaf probability of one vocabulary entry.
    pub fn probability(&self, index: usize) -> f64 {
        debug_assert!(index < self.probabilities.len());
        self.probabilities[index]
    }

    /// `sum_v P(v) g'(x_v) x_v`, subtracted from every leaf term of the
    /// energy-projection gradient.
    pub fn expected_energy_gradient(&self) -> &Tensor {
        &self.expected_energy_gradient
    }

    /// The lexical-normalizer pull on one embedding column:
    /// `P(index) g'(x_index) u`.
    pub fn embedding_correction(
        &self,
        model: &CompositionModel,
        index: usize,
    ) -> ModelResult<Tensor> {
        let x = model.params().x().column(index)?;
        let g = model.energy_derivative(&x)?;
        Ok(model
            .params()
            .u()
            .scale(g * self.probability(index))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Parameters;

    fn model() -> CompositionModel {
        let params = Parameters::from_parts(
            Tensor::zeros(2, 4).unwrap(),
            Tensor::column_vector(vec![0.5, -0.25]).unwrap(),
            Tensor::from_vec(2, 3, vec![1.0, 0.0, -1.0, 0.0, 2.0, 1.0]).unwrap(),
        )
        .unwrap();
        CompositionModel::new(params)
    }

    #[test]
    fn partition_matches_direct_sum() {
        let m = model();
        let leaf = LeafExpectations::new(&m).unwrap();
        let mut expected = 0.0;
        for v in 0..3 {
            let x = m.params().x().column(v).unwrap();
            expected += (-m.energy(&x).unwrap()).exp();
        }
        assert!((leaf.z_word() - expected).abs() < 1e-12);
        let total: f64 = (0..3).map(|v| leaf.probability(v)).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn expected_energy_gradient_is_probability_weighted() {
        let m = model();
        let leaf = LeafExpectations::new(&m).unwrap();
        let mut expected = Tensor::zeros(2, 1).unwrap();
        for v in 0..3 {
            let x = m.params().x().column(v).unwrap();
            expected.add_scaled(&x, leaf.probability(v)).unwrap();
        }
        for (a, b) in leaf
            .expected_energy_gradient()
            .data()
            .iter()
            .zip(expected.data())
        {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn embedding_correction_scales_u_by_probability() {
        let m = model();
        let leaf = LeafExpectations::new(&m).unwrap();
        let corr = leaf.embedding_correction(&m, 1).unwrap();
        let expected = m.params().u().scale(leaf.probability(1)).unwrap();
        assert_eq!(corr.data(), expected.data());
    }

    #[test]
    fn empty_vocabulary_is_rejected_at_parameter_level() {
        // A zero-column embedding matrix cannot be constructed, so the
        // cache's own guard is exercised through Parameters validation.
        assert!(Tensor::zeros(2, 0).is_err());
    }
}
