// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The language-model facade: one model, one grammar provider, and the
//! `score` / `score_with_gradients` surface exposed to training and
//! evaluation code.

use crate::error::{ModelError, ModelResult};
use crate::gradients::{compute_gradients, GradientClamp, GradientSet, LeafExpectations};
use crate::model::CompositionModel;
use crate::parallel::{BlockExecutor, Execution};
use crate::scorer::CompositionalScore;
use clm_grammar::{Grammar, Sentence};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Execution and numerical-stability knobs for the engine.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LmConfig {
    /// Fan inner loops out over a worker pool.
    pub parallel: bool,
    /// Worker count; 0 lets the pool pick its default.
    pub threads: usize,
    /// Indices per dispatched block.
    pub block_size: usize,
    pub clamp: GradientClamp,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            threads: 0,
            block_size: 8,
            clamp: GradientClamp::default(),
        }
    }
}

/// A compositional language model bound to a grammar score provider.
#[derive(Debug)]
pub struct CompositionalLm<G: Grammar> {
    model: CompositionModel,
    grammar: G,
    config: LmConfig,
    executor: Option<BlockExecutor>,
}

impl<G: Grammar> CompositionalLm<G> {
    pub fn new(model: CompositionModel, grammar: G, config: LmConfig) -> ModelResult<Self> {
        let executor = if config.parallel {
            Some(BlockExecutor::new(config.threads, config.block_size)?)
        } else {
            None
        };
        Ok(Self {
            model,
            grammar,
            config,
            executor,
        })
    }

    pub fn model(&self) -> &CompositionModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut CompositionModel {
        &mut self.model
    }

    pub fn grammar(&self) -> &G {
        &self.grammar
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    fn execution(&self) -> Execution<'_> {
        match &self.executor {
            Some(executor) => Execution::Blocks(executor),
            None => Execution::Sequential,
        }
    }

    /// Computes the full chart for a sentence and returns it; the
    /// gradient passes reuse it read-only.
    pub fn chart(&self, sentence: &Sentence) -> ModelResult<CompositionalScore> {
        let tables = self.grammar.tables(sentence)?;
        if tables.len() != sentence.len() {
            return Err(clm_grammar::GrammarError::LengthMismatch {
                expected: tables.len(),
                got: sentence.len(),
            }
            .into());
        }
        if tables.inside_span(0, sentence.len()) == 0.0 {
            return Err(ModelError::ZeroPartition {
                sentence: sentence.id(),
                len: sentence.len(),
            });
        }
        CompositionalScore::compute(&self.model, &tables, sentence, self.execution())
    }

    /// Log-probability of the sentence under the combined model. A
    /// sentence the grammar rules out entirely is a fatal error, not a
    /// silent `-inf`.
    pub fn score(&self, sentence: &Sentence) -> ModelResult<f64> {
        let score = self.chart(sentence)?;
        let value = score.sentence_score();
        info!(
            sentence = sentence.id(),
            len = sentence.len(),
            score = value,
            "scored sentence"
        );
        Ok(value)
    }

    /// Log-probability plus the per-tensor gradients of the negative
    /// log-likelihood.
    pub fn score_with_gradients(
        &self,
        sentence: &Sentence,
        leaf: &LeafExpectations,
    ) -> ModelResult<(f64, GradientSet)> {
        let score = self.chart(sentence)?;
        let gradients = compute_gradients(
            &self.model,
            &score,
            leaf,
            self.execution(),
            &self.config.clamp,
        )?;
        Ok((score.sentence_score(), gradients))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Parameters;
    use clm_grammar::{GrammarTables, PrecomputedGrammar, Word};

    fn lm(len: usize, value: f64) -> CompositionalLm<PrecomputedGrammar> {
        let model = CompositionModel::new(Parameters::new(2, 4, 23).unwrap());
        let grammar = PrecomputedGrammar::new(GrammarTables::filled(len, value).unwrap());
        CompositionalLm::new(model, grammar, LmConfig::default()).unwrap()
    }

    fn sentence(indices: &[usize]) -> Sentence {
        Sentence::from_words(
            0,
            indices
                .iter()
                .map(|&i| Word::new(format!("w{i}"), i))
                .collect(),
        )
    }

    #[test]
    fn zero_root_probability_is_fatal() {
        let lm = lm(2, 0.0);
        let err = lm.score(&sentence(&[0, 1])).unwrap_err();
        assert!(matches!(err, ModelError::ZeroPartition { len: 2, .. }));
    }

    #[test]
    fn scoring_returns_finite_log_probability() {
        let lm = lm(2, 0.5);
        let value = lm.score(&sentence(&[0, 1])).unwrap();
        assert!(value.is_finite());
    }

    #[test]
    fn gradients_come_back_shaped_like_parameters() {
        let lm = lm(2, 0.5);
        let leaf = LeafExpectations::new(lm.model()).unwrap();
        let (value, grads) = lm
            .score_with_gradients(&sentence(&[0, 1]), &leaf)
            .unwrap();
        assert!(value.is_finite());
        assert_eq!(grads.w().shape(), (2, 4));
        assert_eq!(grads.u().shape(), (2, 1));
        assert!(grads.x().len() <= 2);
    }
}
