// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use thiserror::Error;

/// Errors emitted by tensor constructors and operators.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TensorError {
    #[error("invalid tensor dimensions ({rows} x {cols}); both axes must be non-zero")]
    InvalidDimensions { rows: usize, cols: usize },

    #[error("data length mismatch: expected {expected}, got {got}")]
    DataLength { expected: usize, got: usize },

    #[error("shape mismatch: left={left:?}, right={right:?} cannot be combined")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("column {index} out of range for a tensor with {cols} columns")]
    ColumnOutOfRange { index: usize, cols: usize },

    #[error("expected a {expected}-dimensional column vector, got shape {got:?}")]
    NotAColumnVector {
        expected: usize,
        got: (usize, usize),
    },
}

/// Result alias used throughout the workspace's tensor layer.
pub type TensorResult<T> = Result<T, TensorError>;
