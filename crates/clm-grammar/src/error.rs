// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use thiserror::Error;

/// Errors emitted by the sentence and grammar-table layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GrammarError {
    #[error("grammar tables cover {expected} positions but the sentence has {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("span ({start}, {end}) is invalid for a chart of length {len}")]
    SpanOutOfBounds {
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("split {split} lies outside span ({start}, {end})")]
    SplitOutOfRange {
        start: usize,
        end: usize,
        split: usize,
    },

    #[error("parent boundary {parent} exceeds chart length {len}")]
    ParentOutOfRange { parent: usize, len: usize },

    #[error(
        "inside-split scores of span ({start}, {end}) sum to {got} but the span score is {expected}"
    )]
    SplitSumViolation {
        start: usize,
        end: usize,
        expected: f64,
        got: f64,
    },

    #[error("word '{surface}' is not in the vocabulary and no unknown marker is set")]
    UnknownWord { surface: String },

    #[error("cannot build grammar tables for an empty sentence")]
    EmptySentence,
}

pub type GrammarResult<T> = Result<T, GrammarError>;
