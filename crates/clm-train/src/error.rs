// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use clm_model::ModelError;
use clm_tensor::TensorError;
use thiserror::Error;

/// Errors emitted by the training layer.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error("learning rate must be positive and finite, got {rate}")]
    NonPositiveLearningRate { rate: f64 },

    #[error("training batch is empty")]
    EmptyBatch,
}

pub type TrainResult<T> = Result<T, TrainError>;
