// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Parameter updates from an accumulated batch gradient.
//!
//! SGD applies `param -= lr * grad` directly. AdaGrad keeps a running
//! sum of squared gradients per tensor, seeded at 1 rather than 0 so
//! the first update cannot divide by zero, and scales each element by
//! `1 / sqrt(history + eps)` before applying the learning rate. The
//! embedding history is kept dense (d x V) even though per-sentence
//! gradients are sparse.

use crate::error::{TrainError, TrainResult};
use clm_model::{GradientSet, Parameters};
use clm_tensor::{Tensor, TensorResult};
use serde::{Deserialize, Serialize};

const ADAGRAD_EPSILON: f64 = 1e-6;

/// Which update rule the trainer applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Sgd,
    AdaGrad,
}

#[derive(Clone, Debug)]
struct AdaGradHistory {
    w: Tensor,
    u: Tensor,
    x: Tensor,
}

impl AdaGradHistory {
    fn seeded(params: &Parameters) -> TensorResult<Self> {
        let mut w = Tensor::zeros(params.dimensions(), 2 * params.dimensions())?;
        let mut u = Tensor::zeros(params.dimensions(), 1)?;
        let mut x = Tensor::zeros(params.dimensions(), params.vocab_size())?;
        w.fill(1.0);
        u.fill(1.0);
        x.fill(1.0);
        Ok(Self { w, u, x })
    }
}

/// Applies accumulated gradients to the parameter tensors. Updates are
/// the only place parameters are mutated; they must not overlap any
/// scoring or gradient call.
#[derive(Clone, Debug)]
pub struct Optimizer {
    kind: OptimizerKind,
    learning_rate: f64,
    history: Option<AdaGradHistory>,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, learning_rate: f64) -> TrainResult<Self> {
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(TrainError::NonPositiveLearningRate {
                rate: learning_rate,
            });
        }
        Ok(Self {
            kind,
            learning_rate,
            history: None,
        })
    }

    pub fn sgd(learning_rate: f64) -> TrainResult<Self> {
        Self::new(OptimizerKind::Sgd, learning_rate)
    }

    pub fn ada_grad(learning_rate: f64) -> TrainResult<Self> {
        Self::new(OptimizerKind::AdaGrad, learning_rate)
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Drops the AdaGrad history, e.g. when restarting training.
    pub fn reset(&mut self) {
        self.history = None;
    }

    /// Applies one update step.
    pub fn update(&mut self, params: &mut Parameters, gradients: &GradientSet) -> TrainResult<()> {
        match self.kind {
            OptimizerKind::Sgd => self.sgd_step(params, gradients),
            OptimizerKind::AdaGrad => self.ada_grad_step(params, gradients),
        }
    }

    fn sgd_step(&self, params: &mut Parameters, gradients: &GradientSet) -> TrainResult<()> {
        let lr = self.learning_rate;
        params.w_mut().add_scaled(gradients.w(), -lr)?;
        params.u_mut().add_scaled(gradients.u(), -lr)?;
        let dimensions = params.dimensions();
        for (index, column) in gradients.x().columns() {
            let x = params.x_mut();
            for r in 0..dimensions {
                let updated = x.get(r, index) - lr * column.get(r, 0);
                x.set(r, index, updated);
            }
        }
        Ok(())
    }

    fn ada_grad_step(&mut self, params: &mut Parameters, gradients: &GradientSet) -> TrainResult<()> {
        let lr = self.learning_rate;
        let mut history = match self.history.take() {
            Some(history) => history,
            None => AdaGradHistory::seeded(params)?,
        };

        adagrad_tensor(params.w_mut(), &mut history.w, gradients.w(), lr)?;
        adagrad_tensor(params.u_mut(), &mut history.u, gradients.u(), lr)?;

        let dimensions = params.dimensions();
        for (index, column) in gradients.x().columns() {
            let x = params.x_mut();
            for r in 0..dimensions {
                let g = column.get(r, 0);
                let h = history.x.get(r, index) + g * g;
                history.x.set(r, index, h);
                let updated = x.get(r, index) - lr * g / (h + ADAGRAD_EPSILON).sqrt();
                x.set(r, index, updated);
            }
        }
        self.history = Some(history);
        Ok(())
    }
}

fn adagrad_tensor(
    param: &mut Tensor,
    history: &mut Tensor,
    gradient: &Tensor,
    lr: f64,
) -> TrainResult<()> {
    if param.shape() != gradient.shape() {
        return Err(clm_tensor::TensorError::ShapeMismatch {
            left: param.shape(),
            right: gradient.shape(),
        }
        .into());
    }
    for ((p, h), g) in param
        .data_mut()
        .iter_mut()
        .zip(history.data_mut().iter_mut())
        .zip(gradient.data().iter())
    {
        *h += g * g;
        *p -= lr * g / (*h + ADAGRAD_EPSILON).sqrt();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clm_model::EmbeddingGradient;

    fn params() -> Parameters {
        Parameters::from_parts(
            Tensor::zeros(2, 4).unwrap(),
            Tensor::column_vector(vec![0.5, 0.5]).unwrap(),
            Tensor::zeros(2, 3).unwrap(),
        )
        .unwrap()
    }

    fn gradient() -> GradientSet {
        let mut w = Tensor::zeros(2, 4).unwrap();
        w.set(0, 0, 2.0);
        let u = Tensor::column_vector(vec![1.0, 0.0]).unwrap();
        let mut x = EmbeddingGradient::new(2);
        x.add_column(2, &Tensor::column_vector(vec![4.0, 0.0]).unwrap())
            .unwrap();
        GradientSet::from_parts(w, u, x)
    }

    #[test]
    fn rejects_bad_learning_rates() {
        assert!(matches!(
            Optimizer::sgd(0.0),
            Err(TrainError::NonPositiveLearningRate { .. })
        ));
        assert!(matches!(
            Optimizer::ada_grad(f64::NAN),
            Err(TrainError::NonPositiveLearningRate { .. })
        ));
    }

    #[test]
    fn sgd_descends_along_the_gradient() {
        let mut opt = Optimizer::sgd(0.1).unwrap();
        let mut p = params();
        opt.update(&mut p, &gradient()).unwrap();
        assert!((p.w().get(0, 0) - (-0.2)).abs() < 1e-12);
        assert!((p.u().get(0, 0) - 0.4).abs() < 1e-12);
        assert!((p.x().get(0, 2) - (-0.4)).abs() < 1e-12);
        // Untouched embedding columns stay untouched.
        assert_eq!(p.x().get(0, 0), 0.0);
    }

    #[test]
    fn ada_grad_history_is_seeded_at_one() {
        let mut opt = Optimizer::ada_grad(0.1).unwrap();
        let mut p = params();
        opt.update(&mut p, &gradient()).unwrap();
        // First step: history = 1 + g^2, update = lr*g/sqrt(1+g^2+eps).
        let g = 2.0_f64;
        let expected = -0.1 * g / (1.0 + g * g + ADAGRAD_EPSILON).sqrt();
        assert!((p.w().get(0, 0) - expected).abs() < 1e-12);

        // Second identical step accumulates the history further.
        let before = p.w().get(0, 0);
        opt.update(&mut p, &gradient()).unwrap();
        let expected_second = -0.1 * g / (1.0 + 2.0 * g * g + ADAGRAD_EPSILON).sqrt();
        assert!((p.w().get(0, 0) - before - expected_second).abs() < 1e-12);
    }

    #[test]
    fn ada_grad_zero_gradient_is_a_fixed_point() {
        let mut opt = Optimizer::ada_grad(0.1).unwrap();
        let mut p = params();
        let zero = GradientSet::zeros(2).unwrap();
        opt.update(&mut p, &zero).unwrap();
        assert_eq!(p.w().max_abs(), 0.0);
        assert!((p.u().get(0, 0) - 0.5).abs() < 1e-12);
    }
}
