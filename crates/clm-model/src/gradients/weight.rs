// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Gradient with respect to the composition weight matrix `W`.
//!
//! `W` reaches every level of the recursive composition, so each weight
//! entry `(i, j)` carries an auxiliary span chart: the derivative of the
//! span's phrase vector with respect to that one entry, built bottom-up
//! in span-width order exactly like the forward composition. Entries are
//! independent of one another and fan out across workers.

use crate::error::ModelResult;
use crate::model::CompositionModel;
use crate::parallel::Execution;
use crate::scorer::CompositionalScore;
use clm_grammar::SpanChart;
use clm_tensor::Tensor;

pub(super) fn compute(
    model: &CompositionModel,
    score: &CompositionalScore,
    execution: Execution<'_>,
) -> ModelResult<Tensor> {
    let dimensions = score.dimensions();
    let cols = 2 * dimensions;
    let entries = execution.map_range(0, dimensions * cols, |flat| {
        entry(model, score, flat / cols, flat % cols)
    });
    let mut w = Tensor::zeros(dimensions, cols)?;
    let z = score.root_inside();
    for (flat, value) in entries.into_iter().enumerate() {
        w.set(flat / cols, flat % cols, value? / z);
    }
    Ok(w)
}

/// The full span/split walk for a single weight entry `(i, j)`.
fn entry(
    model: &CompositionModel,
    score: &CompositionalScore,
    i: usize,
    j: usize,
) -> ModelResult<f64> {
    let len = score.len();
    let dimensions = score.dimensions();
    // response(start, end) = d phrase(start, end) / d W_ij. Leaf phrase
    // vectors do not involve W, so leaves stay zero.
    let mut response = SpanChart::new(len, Tensor::zeros(dimensions, 1)?);
    let mut total = 0.0;

    for diff in 2..=len {
        for start in 0..=(len - diff) {
            let end = start + diff;
            let mut span_response = Tensor::zeros(dimensions, 1)?;
            let mut expectation = 0.0;
            let mut zeta_total = 0.0;
            let mut mu_total = 0.0;
            for split in (start + 1)..end {
                let child1 = score.phrase(start, split);
                let child2 = score.phrase(split, end);
                let dc = model.compose_derivative(child1, child2)?;
                // d(W . [c1; c2])_r / dW_ij places the selected child
                // coordinate at row i, plus the chained responses of
                // both children.
                let selected = if j < dimensions {
                    child1.get(j, 0)
                } else {
                    child2.get(j - dimensions, 0)
                };
                let stacked =
                    Tensor::cat_rows(&[response.get(start, split), response.get(split, end)])?;
                let mut split_response = model.params().w().matmul(&stacked)?;
                split_response.data_mut()[i] += selected;
                let split_response = split_response.hadamard(&dc)?;

                let g = model.energy_comp_derivative(
                    score.composition(start, end, split),
                    child1,
                    child2,
                )?;
                let local = model.params().u().dot(&split_response)? * g;
                let mu = score.mu(start, end, split);
                total += local * mu;
                mu_total += mu;
                let zeta = score.composition_score(start, end, split);
                zeta_total += zeta;
                expectation += local * zeta;

                span_response.add_scaled(&split_response, score.inside_split(start, end, split))?;
            }
            if zeta_total > 0.0 {
                total -= expectation / zeta_total * mu_total;
            }
            let denom = score.inside(start, end);
            if denom > 0.0 {
                span_response.scale_inplace(1.0 / denom);
            }
            response.set(start, end, span_response);
        }
    }
    Ok(total)
}
