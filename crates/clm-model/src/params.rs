// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::ModelResult;
use clm_tensor::{Tensor, TensorError};
use serde::{Deserialize, Serialize};

/// The three trainable tensors of the composition model: the composition
/// weights `w` (d x 2d), the energy projection `u` (d x 1), and the word
/// embedding matrix `x` (d x V).
///
/// Parameters are mutated only by an optimizer update, never by the
/// scorer or the gradient passes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    dimensions: usize,
    vocab_size: usize,
    w: Tensor,
    u: Tensor,
    x: Tensor,
}

impl Parameters {
    /// Seeded uniform initialization in `[-0.1, 0.1)`.
    pub fn new(dimensions: usize, vocab_size: usize, seed: u64) -> ModelResult<Self> {
        let w = Tensor::random_uniform(dimensions, 2 * dimensions, -0.1, 0.1, seed)?;
        let u = Tensor::random_uniform(dimensions, 1, -0.1, 0.1, seed.wrapping_add(1))?;
        let x = Tensor::random_uniform(dimensions, vocab_size, -0.1, 0.1, seed.wrapping_add(2))?;
        Ok(Self {
            dimensions,
            vocab_size,
            w,
            u,
            x,
        })
    }

    /// Builds parameters from explicit tensors, validating every shape
    /// against the embedding dimensionality.
    pub fn from_parts(w: Tensor, u: Tensor, x: Tensor) -> ModelResult<Self> {
        let dimensions = u.rows();
        if u.cols() != 1 {
            return Err(TensorError::NotAColumnVector {
                expected: dimensions,
                got: u.shape(),
            }
            .into());
        }
        if w.shape() != (dimensions, 2 * dimensions) {
            return Err(TensorError::ShapeMismatch {
                left: w.shape(),
                right: (dimensions, 2 * dimensions),
            }
            .into());
        }
        if x.rows() != dimensions {
            return Err(TensorError::ShapeMismatch {
                left: x.shape(),
                right: (dimensions, x.cols()),
            }
            .into());
        }
        let vocab_size = x.cols();
        Ok(Self {
            dimensions,
            vocab_size,
            w,
            u,
            x,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn w(&self) -> &Tensor {
        &self.w
    }

    pub fn u(&self) -> &Tensor {
        &self.u
    }

    pub fn x(&self) -> &Tensor {
        &self.x
    }

    pub fn w_mut(&mut self) -> &mut Tensor {
        &mut self.w
    }

    pub fn u_mut(&mut self) -> &mut Tensor {
        &mut self.u
    }

    pub fn x_mut(&mut self) -> &mut Tensor {
        &mut self.x
    }
}
