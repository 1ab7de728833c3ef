// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Gradient with respect to the embedding matrix `X`.
//!
//! One d-dimensional column per distinct vocabulary index in the
//! sentence. Each sentence position carries an auxiliary span chart of
//! d x d response matrices (the derivative of the span's phrase vector
//! with respect to that position's embedding), seeded with the identity
//! at the position's own leaf and propagated upward like the forward
//! composition. Positions are independent and fan out across workers.

use crate::error::ModelResult;
use crate::gradients::leaf::LeafExpectations;
use crate::gradients::EmbeddingGradient;
use crate::model::CompositionModel;
use crate::parallel::Execution;
use crate::scorer::CompositionalScore;
use clm_grammar::SpanChart;
use clm_tensor::Tensor;

pub(super) fn compute(
    model: &CompositionModel,
    score: &CompositionalScore,
    leaf: &LeafExpectations,
    execution: Execution<'_>,
) -> ModelResult<EmbeddingGradient> {
    let len = score.len();
    let columns = execution.map_range(0, len, |position| column(model, score, leaf, position));
    let z = score.root_inside();
    let mut gradient = EmbeddingGradient::new(score.dimensions());
    for result in columns {
        let (index, mut column) = result?;
        column.scale_inplace(1.0 / z);
        gradient.add_column(index, &column)?;
    }
    Ok(gradient)
}

/// The full span/split walk for the embedding of one sentence position.
fn column(
    model: &CompositionModel,
    score: &CompositionalScore,
    leaf: &LeafExpectations,
    position: usize,
) -> ModelResult<(usize, Tensor)> {
    let len = score.len();
    let dimensions = score.dimensions();
    let word_index = score.sentence().words()[position].index();

    // response(start, end)[m][r] = d phrase(start, end)_m / d x_r.
    // The identity at this position's leaf, zero at every other leaf.
    let mut response = SpanChart::new(len, Tensor::zeros(dimensions, dimensions)?);
    response.set(position, position + 1, Tensor::eye(dimensions)?);

    let mut acc = Tensor::zeros(dimensions, 1)?;

    // Leaf term: g'(x) u, pulled back by the lexical normalizer's
    // expectation for this column.
    let phrase = score.phrase(position, position + 1);
    let g = model.energy_derivative(phrase)?;
    let mut local = model.params().u().scale(g)?;
    local = local.sub(&leaf.embedding_correction(model, word_index)?)?;
    acc.add_scaled(&local, score.mu(position, position + 1, position))?;

    for diff in 2..=len {
        for start in 0..=(len - diff) {
            let end = start + diff;
            let mut span_response = Tensor::zeros(dimensions, dimensions)?;
            let mut expectation = Tensor::zeros(dimensions, 1)?;
            let mut zeta_total = 0.0;
            let mut mu_total = 0.0;
            for split in (start + 1)..end {
                let child1 = score.phrase(start, split);
                let child2 = score.phrase(split, end);
                let dc = model.compose_derivative(child1, child2)?;
                let stacked =
                    Tensor::cat_rows(&[response.get(start, split), response.get(split, end)])?;
                let split_response = model.params().w().matmul(&stacked)?.scale_rows(&dc)?;

                let g = model.energy_comp_derivative(
                    score.composition(start, end, split),
                    child1,
                    child2,
                )?;
                let local = split_response
                    .transpose()
                    .matmul(model.params().u())?
                    .scale(g)?;
                let mu = score.mu(start, end, split);
                acc.add_scaled(&local, mu)?;
                mu_total += mu;
                let zeta = score.composition_score(start, end, split);
                zeta_total += zeta;
                expectation.add_scaled(&local, zeta)?;

                span_response.add_scaled(&split_response, score.inside_split(start, end, split))?;
            }
            if zeta_total > 0.0 {
                acc.add_scaled(&expectation, -mu_total / zeta_total)?;
            }
            let denom = score.inside(start, end);
            if denom > 0.0 {
                span_response.scale_inplace(1.0 / denom);
            }
            response.set(start, end, span_response);
        }
    }
    Ok((word_index, acc))
}
