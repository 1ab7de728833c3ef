// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The batch training loop.
//!
//! Each epoch: refresh the leaf expectations (parameters changed last
//! epoch), score every sentence and accumulate gradients, average by the
//! batch's token count, update the parameters, and test convergence
//! against the previous epoch's loss scaled by the tolerance. A sentence
//! that fails structurally is skipped with a warning unless the
//! configuration says to abort.

use crate::accumulator::GradientAccumulator;
use crate::error::{TrainError, TrainResult};
use crate::optim::{Optimizer, OptimizerKind};
use clm_grammar::{Grammar, Sentence};
use clm_model::{CompositionalLm, LeafExpectations};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub learning_rate: f64,
    pub max_epochs: usize,
    /// Convergence factor: training stops once the batch loss fails to
    /// drop below `previous * tolerance`.
    pub tolerance: f64,
    pub optimizer: OptimizerKind,
    /// Abort the whole fit on a structurally invalid sentence instead of
    /// skipping it.
    pub abort_on_error: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            max_epochs: 10,
            tolerance: 0.999,
            optimizer: OptimizerKind::AdaGrad,
            abort_on_error: false,
        }
    }
}

/// Per-epoch outcome.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    /// Mean negative log-likelihood per token over the batch.
    pub batch_loss: f64,
    pub accepted: usize,
    pub rejected: usize,
    pub skipped: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FitReport {
    pub epochs: Vec<EpochStats>,
    pub converged: bool,
}

/// Drives epochs of scoring, accumulation, and optimizer updates over a
/// [`CompositionalLm`].
#[derive(Debug)]
pub struct Trainer<G: Grammar> {
    lm: CompositionalLm<G>,
    optimizer: Optimizer,
    config: TrainConfig,
}

impl<G: Grammar> Trainer<G> {
    pub fn new(lm: CompositionalLm<G>, config: TrainConfig) -> TrainResult<Self> {
        let optimizer = Optimizer::new(config.optimizer, config.learning_rate)?;
        Ok(Self {
            lm,
            optimizer,
            config,
        })
    }

    pub fn lm(&self) -> &CompositionalLm<G> {
        &self.lm
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    /// Mean log-probability per token over a batch, without gradients.
    pub fn batch_score(&self, batch: &[Sentence]) -> TrainResult<f64> {
        let tokens: usize = batch.iter().map(Sentence::len).sum();
        if tokens == 0 {
            return Err(TrainError::EmptyBatch);
        }
        let mut total = 0.0;
        for sentence in batch {
            total += self.lm.score(sentence)?;
        }
        Ok(total / tokens as f64)
    }

    /// Runs up to `max_epochs` epochs over the batch.
    pub fn fit(&mut self, batch: &[Sentence]) -> TrainResult<FitReport> {
        if batch.is_empty() {
            return Err(TrainError::EmptyBatch);
        }
        let tokens: usize = batch.iter().map(Sentence::len).sum();
        let dimensions = self.lm.model().dimensions();
        let mut report = FitReport::default();
        let mut previous_loss = f64::INFINITY;

        for epoch in 0..self.config.max_epochs {
            // Parameters moved last epoch; the leaf cache must follow.
            let leaf = LeafExpectations::new(self.lm.model())?;
            let mut accumulator = GradientAccumulator::new(dimensions)?;
            let mut skipped = 0;
            let mut log_likelihood = 0.0;

            for sentence in batch {
                match self.lm.score_with_gradients(sentence, &leaf) {
                    Ok((score, gradients)) => {
                        log_likelihood += score;
                        accumulator.add(&gradients)?;
                    }
                    Err(err) => {
                        if self.config.abort_on_error {
                            return Err(err.into());
                        }
                        warn!(
                            sentence = sentence.id(),
                            error = %err,
                            "skipping sentence this epoch"
                        );
                        skipped += 1;
                    }
                }
            }

            let batch_loss = -log_likelihood / tokens as f64;
            info!(
                epoch,
                batch_loss,
                accepted = accumulator.accepted(),
                rejected = accumulator.rejected(),
                skipped,
                "finished epoch"
            );
            report.epochs.push(EpochStats {
                epoch,
                batch_loss,
                accepted: accumulator.accepted(),
                rejected: accumulator.rejected(),
                skipped,
            });

            if batch_loss > previous_loss * self.config.tolerance {
                info!(epoch, batch_loss, previous_loss, "converged");
                report.converged = true;
                break;
            }
            previous_loss = batch_loss;

            if accumulator.accepted() > 0 {
                accumulator.scale(1.0 / tokens as f64);
                self.optimizer
                    .update(self.lm.model_mut().params_mut(), accumulator.gradients())?;
            }
        }
        Ok(report)
    }
}
