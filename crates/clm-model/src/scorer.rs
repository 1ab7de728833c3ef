// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The forward chart pass: compositional inside, outside, and posterior
//! (mu) scores for one sentence.
//!
//! Three strictly ordered phases, each a full sweep over the chart:
//! inside (increasing span width), outside (decreasing width, seeded at
//! the root), then mu. Per-width work fans out through [`Execution`];
//! every task returns its span's contribution and the single-threaded
//! reducer writes cells, so the parallel path reproduces the sequential
//! one bitwise.

use crate::error::{ModelError, ModelResult};
use crate::model::CompositionModel;
use crate::parallel::Execution;
use clm_grammar::{GrammarError, GrammarTables, Sentence, SpanChart, SplitChart};
use clm_tensor::Tensor;
use tracing::{debug, error};

/// All per-sentence chart tables. Exclusively owned: one instance per
/// scoring call, read-only afterwards (the gradient passes borrow it).
#[derive(Clone, Debug)]
pub struct CompositionalScore {
    sentence: Sentence,
    dimensions: usize,
    len: usize,
    /// Posterior-weighted phrase vector of every span.
    phrase: SpanChart<Tensor>,
    /// Composed vector of every span/split.
    composition: SplitChart<Tensor>,
    /// Unnormalized composition score `exp(-energy)` per span/split.
    composition_score: SplitChart<f64>,
    /// Composition score marginalized over splits.
    cumulative_score: SpanChart<f64>,
    /// Compositional inside score.
    inside: SpanChart<f64>,
    /// Compositional inside score per split.
    inside_split: SplitChart<f64>,
    /// Compositional outside score.
    outside: SpanChart<f64>,
    /// Compositional posterior weight per span/split.
    mu: SplitChart<f64>,
    /// The grammar's own inside score of the root span, kept for the
    /// score sanity policy.
    grammar_root: f64,
}

struct LeafCell {
    vector: Tensor,
    zeta: f64,
}

struct SplitCell {
    split: usize,
    composition: Tensor,
    zeta: f64,
    weight: f64,
}

struct SpanCell {
    start: usize,
    splits: Vec<SplitCell>,
    cumulative: f64,
    inside: f64,
    phrase: Tensor,
}

impl CompositionalScore {
    /// Runs the three phases for `sentence` against the grammar tables.
    pub fn compute(
        model: &CompositionModel,
        tables: &GrammarTables,
        sentence: &Sentence,
        execution: Execution<'_>,
    ) -> ModelResult<Self> {
        let len = sentence.len();
        if len == 0 {
            return Err(ModelError::EmptySentence {
                sentence: sentence.id(),
            });
        }
        if tables.len() != len {
            return Err(GrammarError::LengthMismatch {
                expected: tables.len(),
                got: len,
            }
            .into());
        }
        let dimensions = model.dimensions();
        let mut score = Self {
            sentence: sentence.clone(),
            dimensions,
            len,
            phrase: SpanChart::new(len, Tensor::zeros(dimensions, 1)?),
            composition: SplitChart::new(len, Tensor::zeros(dimensions, 1)?),
            composition_score: SplitChart::new(len, 0.0),
            cumulative_score: SpanChart::new(len, 0.0),
            inside: SpanChart::new(len, 0.0),
            inside_split: SplitChart::new(len, 0.0),
            outside: SpanChart::new(len, 0.0),
            mu: SplitChart::new(len, 0.0),
            grammar_root: tables.inside_span(0, len),
        };
        debug!(sentence = sentence.id(), len, "starting inside phase");
        score.inside_phase(model, tables, execution)?;
        debug!(sentence = sentence.id(), len, "starting outside phase");
        score.outside_phase(tables, execution);
        debug!(sentence = sentence.id(), len, "starting mu phase");
        score.mu_phase(tables, execution);
        Ok(score)
    }

    fn inside_phase(
        &mut self,
        model: &CompositionModel,
        tables: &GrammarTables,
        execution: Execution<'_>,
    ) -> ModelResult<()> {
        let len = self.len;

        // Leaf spans: the word vector is the phrase vector; its energy,
        // weighted by the grammar's inside probability, seeds the chart.
        let leaves = {
            let words = self.sentence.words();
            execution.map_range(0, len, |start| -> ModelResult<LeafCell> {
                let vector = model.word2vec(&words[start])?;
                let zeta = model.leaf_score(&vector)?;
                Ok(LeafCell { vector, zeta })
            })
        };
        for (start, cell) in leaves.into_iter().enumerate() {
            let LeafCell { vector, zeta } = cell?;
            let end = start + 1;
            let weight = zeta * tables.inside_span(start, end);
            self.phrase.set(start, end, vector.clone());
            self.composition.set(start, end, start, vector);
            self.composition_score.set(start, end, start, zeta);
            self.cumulative_score.set(start, end, zeta);
            self.inside.set(start, end, weight);
            self.inside_split.set(start, end, start, weight);
        }

        // Wider spans in increasing width order. Spans of one width only
        // read strictly narrower cells, so they fan out together.
        for diff in 2..=len {
            let spans = {
                let phrase = &self.phrase;
                let inside = &self.inside;
                execution.map_range(0, len - diff + 1, |start| -> ModelResult<Option<SpanCell>> {
                    let end = start + diff;
                    // A grammar-impossible span propagates the PCFG's
                    // hard zero: skipped entirely.
                    if tables.inside_span(start, end) == 0.0 {
                        return Ok(None);
                    }
                    let mut splits = Vec::with_capacity(diff - 1);
                    let mut cumulative = 0.0;
                    let mut inside_total = 0.0;
                    let mut phrase_acc = Tensor::zeros(model.dimensions(), 1)?;
                    for split in (start + 1)..end {
                        let child1 = phrase.get(start, split);
                        let child2 = phrase.get(split, end);
                        let composed = model.compose(child1, child2)?;
                        let energy = model.energy_comp(&composed, child1, child2)?;
                        let zeta = (-energy).exp();
                        let weight = tables.inside_span_split(start, end, split)
                            * zeta
                            * inside.get(start, split)
                            * inside.get(split, end);
                        cumulative += zeta;
                        inside_total += weight;
                        phrase_acc.add_scaled(&composed, weight)?;
                        splits.push(SplitCell {
                            split,
                            composition: composed,
                            zeta,
                            weight,
                        });
                    }
                    // The phrase vector is the split-weighted average;
                    // a zero inside score leaves it at zero rather than
                    // dividing.
                    if inside_total > 0.0 {
                        phrase_acc.scale_inplace(1.0 / inside_total);
                    }
                    Ok(Some(SpanCell {
                        start,
                        splits,
                        cumulative,
                        inside: inside_total,
                        phrase: phrase_acc,
                    }))
                })
            };
            for cell in spans {
                let Some(cell) = cell? else { continue };
                let end = cell.start + diff;
                for sc in cell.splits {
                    self.composition.set(cell.start, end, sc.split, sc.composition);
                    self.composition_score.set(cell.start, end, sc.split, sc.zeta);
                    self.inside_split.set(cell.start, end, sc.split, sc.weight);
                }
                self.cumulative_score.set(cell.start, end, cell.cumulative);
                self.inside.set(cell.start, end, cell.inside);
                self.phrase.set(cell.start, end, cell.phrase);
            }
        }
        Ok(())
    }

    fn outside_phase(&mut self, tables: &GrammarTables, execution: Execution<'_>) {
        let len = self.len;
        // Seeded at the root with unit weight.
        self.outside.set(0, len, 1.0);

        for diff in (1..=len).rev() {
            let values = {
                let composition_score = &self.composition_score;
                let cumulative = &self.cumulative_score;
                execution.map_range(0, len - diff + 1, |start| {
                    let end = start + diff;
                    let mut acc = if start == 0 && end == len { 1.0 } else { 0.0 };
                    // Ancestors beginning before this span: parent
                    // (parent_l, end) splits at `start`, sibling
                    // (parent_l, start).
                    for parent_l in 0..start {
                        acc += composition_score.get(parent_l, end, start)
                            * cumulative.get(parent_l, start)
                            * tables.outside_span_with_parent(start, end, parent_l);
                    }
                    // Ancestors ending after this span: parent
                    // (start, parent_r) splits at `end`, sibling
                    // (end, parent_r).
                    for parent_r in (end + 1)..=len {
                        acc += composition_score.get(start, parent_r, end)
                            * cumulative.get(end, parent_r)
                            * tables.outside_span_with_parent(start, end, parent_r);
                    }
                    acc
                })
            };
            for (start, value) in values.into_iter().enumerate() {
                self.outside.set(start, start + diff, value);
            }
        }
    }

    fn mu_phase(&mut self, tables: &GrammarTables, execution: Execution<'_>) {
        let len = self.len;
        for diff in 1..=len {
            let values = {
                let composition_score = &self.composition_score;
                let cumulative = &self.cumulative_score;
                execution.map_range(0, len - diff + 1, |start| {
                    let end = start + diff;
                    let splits: Vec<usize> = if diff == 1 {
                        vec![start]
                    } else {
                        ((start + 1)..end).collect()
                    };
                    splits
                        .into_iter()
                        .map(|split| {
                            let base = if diff == 1 {
                                *composition_score.get(start, end, split)
                            } else {
                                *composition_score.get(start, end, split)
                                    * cumulative.get(start, split)
                                    * cumulative.get(split, end)
                            };
                            // Three ancestor cases: parents ending at
                            // `end` that start earlier, the span with no
                            // strict ancestor (parent key == end), and
                            // parents starting at `start` that end later.
                            // Each strict ancestor contributes its own
                            // composition score at the shared boundary
                            // times the sibling's cumulative score.
                            let mut acc =
                                tables.mu_span_split_with_parent(start, end, split, end) * base;
                            for parent_l in 0..start {
                                acc += tables.mu_span_split_with_parent(start, end, split, parent_l)
                                    * base
                                    * composition_score.get(parent_l, end, start)
                                    * cumulative.get(parent_l, start);
                            }
                            for parent_r in (end + 1)..=len {
                                acc += tables.mu_span_split_with_parent(start, end, split, parent_r)
                                    * base
                                    * composition_score.get(start, parent_r, end)
                                    * cumulative.get(end, parent_r);
                            }
                            (split, acc)
                        })
                        .collect::<Vec<_>>()
                })
            };
            for (start, cells) in values.into_iter().enumerate() {
                let end = start + diff;
                for (split, value) in cells {
                    self.mu.set(start, end, split, value);
                }
            }
        }
    }

    pub fn sentence(&self) -> &Sentence {
        &self.sentence
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn phrase(&self, start: usize, end: usize) -> &Tensor {
        self.phrase.get(start, end)
    }

    pub fn composition(&self, start: usize, end: usize, split: usize) -> &Tensor {
        self.composition.get(start, end, split)
    }

    pub fn composition_score(&self, start: usize, end: usize, split: usize) -> f64 {
        *self.composition_score.get(start, end, split)
    }

    pub fn cumulative_score(&self, start: usize, end: usize) -> f64 {
        *self.cumulative_score.get(start, end)
    }

    pub fn inside(&self, start: usize, end: usize) -> f64 {
        *self.inside.get(start, end)
    }

    pub fn inside_split(&self, start: usize, end: usize, split: usize) -> f64 {
        *self.inside_split.get(start, end, split)
    }

    pub fn outside(&self, start: usize, end: usize) -> f64 {
        *self.outside.get(start, end)
    }

    pub fn mu(&self, start: usize, end: usize, split: usize) -> f64 {
        *self.mu.get(start, end, split)
    }

    /// The unnormalized sentence likelihood: the compositional inside
    /// score of the root span.
    pub fn root_inside(&self) -> f64 {
        *self.inside.get(0, self.len)
    }

    /// Log of the root inside score, with the sanity policy applied: a
    /// non-finite or non-positive score reports negative infinity, a
    /// score at or above the grammar's own root score reports positive
    /// infinity; both are logged as errors instead of propagating NaN.
    pub fn sentence_score(&self) -> f64 {
        let z = self.root_inside();
        if z.is_nan() || z <= 0.0 {
            error!(
                sentence = self.sentence.id(),
                score = z,
                "root inside score is not positive"
            );
            return f64::NEG_INFINITY;
        }
        if !z.is_finite() {
            error!(
                sentence = self.sentence.id(),
                score = z,
                "root inside score overflowed"
            );
            return f64::INFINITY;
        }
        if self.grammar_root > 0.0 && z >= self.grammar_root {
            error!(
                sentence = self.sentence.id(),
                score = z,
                grammar = self.grammar_root,
                "compositional score is not below the grammar score"
            );
            return f64::INFINITY;
        }
        z.ln()
    }
}
