// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::TrainResult;
use clm_model::GradientSet;
use tracing::warn;

/// Accumulates per-sentence gradient sets into a batch gradient. A set
/// containing NaN/Inf is refused with a warning instead of merged, so a
/// corrupted sentence cannot poison the batch. One accumulator owns the
/// batch gradient for one training step.
#[derive(Debug)]
pub struct GradientAccumulator {
    acc: GradientSet,
    accepted: usize,
    rejected: usize,
}

impl GradientAccumulator {
    pub fn new(dimensions: usize) -> TrainResult<Self> {
        Ok(Self {
            acc: GradientSet::zeros(dimensions)?,
            accepted: 0,
            rejected: 0,
        })
    }

    /// Merges one sentence's gradients; returns whether they were
    /// accepted.
    pub fn add(&mut self, gradients: &GradientSet) -> TrainResult<bool> {
        if gradients.has_non_finite() {
            warn!("gradient set contains NaN/Inf; refusing to accumulate");
            self.rejected += 1;
            return Ok(false);
        }
        self.acc.add(gradients)?;
        self.accepted += 1;
        Ok(true)
    }

    /// Scales the batch gradient, e.g. for batch averaging.
    pub fn scale(&mut self, factor: f64) {
        self.acc.scale(factor);
    }

    /// Deterministically zeroes the batch gradient and counters before a
    /// new accumulation cycle.
    pub fn clear(&mut self) {
        self.acc.clear();
        self.accepted = 0;
        self.rejected = 0;
    }

    pub fn gradients(&self) -> &GradientSet {
        &self.acc
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }
}
