// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use clm_grammar::GrammarError;
use clm_tensor::TensorError;
use thiserror::Error;

/// Errors emitted by the scoring engine and gradient passes.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error("word index {index} out of range for a vocabulary of size {vocab_size}")]
    WordIndex { index: usize, vocab_size: usize },

    #[error("sentence {sentence} has no tokens to score")]
    EmptySentence { sentence: usize },

    #[error(
        "zero partition function at the root span (0, {len}) of sentence {sentence}; \
         the sentence is impossible under the model and gradients are undefined"
    )]
    ZeroPartition { sentence: usize, len: usize },

    #[error("leaf partition function is {z}; leaf expectations are undefined")]
    LeafPartition { z: f64 },

    #[error("cannot compute leaf expectations over an empty vocabulary")]
    EmptyVocabulary,

    #[error("failed to build the worker pool: {message}")]
    ThreadPool { message: String },
}

pub type ModelResult<T> = Result<T, ModelError>;
