// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Gradient with respect to the energy projection `u`.
//!
//! `u` touches only the energy function, never the recursive
//! composition, so no auxiliary propagation table is needed: the local
//! derivative at a cell is the cell's vector scaled by the energy
//! derivative. Leaf terms are corrected by the vocabulary-wide
//! expectation, composed terms by the span's own split distribution.

use crate::error::ModelResult;
use crate::gradients::leaf::LeafExpectations;
use crate::model::CompositionModel;
use crate::parallel::Execution;
use crate::scorer::CompositionalScore;
use clm_tensor::Tensor;

pub(super) fn compute(
    model: &CompositionModel,
    score: &CompositionalScore,
    leaf: &LeafExpectations,
    execution: Execution<'_>,
) -> ModelResult<Tensor> {
    let len = score.len();
    let dimensions = score.dimensions();
    let mut acc = Tensor::zeros(dimensions, 1)?;

    // Leaf spans: (g'(x) x - E_lex[g' x]) mu.
    let leaf_terms = execution.map_range(0, len, |start| -> ModelResult<Tensor> {
        let end = start + 1;
        let phrase = score.phrase(start, end);
        let g = model.energy_derivative(phrase)?;
        let mut local = phrase.scale(g)?;
        local = local.sub(leaf.expected_energy_gradient())?;
        Ok(local.scale(score.mu(start, end, start))?)
    });
    for term in leaf_terms {
        acc.add_scaled(&term?, 1.0)?;
    }

    // Composed spans: mu-weighted locals minus the expectation under the
    // model's own split distribution.
    for diff in 2..=len {
        let span_terms = execution.map_range(0, len - diff + 1, |start| -> ModelResult<Tensor> {
            let end = start + diff;
            let mut span_acc = Tensor::zeros(dimensions, 1)?;
            let mut expectation = Tensor::zeros(dimensions, 1)?;
            let mut zeta_total = 0.0;
            let mut mu_total = 0.0;
            for split in (start + 1)..end {
                let composed = score.composition(start, end, split);
                let g = model.energy_comp_derivative(
                    composed,
                    score.phrase(start, split),
                    score.phrase(split, end),
                )?;
                let local = composed.scale(g)?;
                let mu = score.mu(start, end, split);
                span_acc.add_scaled(&local, mu)?;
                mu_total += mu;
                let zeta = score.composition_score(start, end, split);
                zeta_total += zeta;
                expectation.add_scaled(&local, zeta)?;
            }
            if zeta_total > 0.0 {
                span_acc.add_scaled(&expectation, -mu_total / zeta_total)?;
            }
            Ok(span_acc)
        });
        for term in span_terms {
            acc.add_scaled(&term?, 1.0)?;
        }
    }

    acc.scale_inplace(1.0 / score.root_inside());
    Ok(acc)
}
