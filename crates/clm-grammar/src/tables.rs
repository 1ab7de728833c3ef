// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! The grammar score-provider contract.
//!
//! [`GrammarTables`] carries the four read-only probability tables the
//! compositional scorer consumes. A value of `0.0` anywhere means
//! "impossible under the grammar" and is silently skipped downstream,
//! never treated as an error.
//!
//! Parent-indexed tables use the parent *boundary* convention: for a span
//! `(start, end)`, a parent key `p < start` names the ancestor
//! `(p, end)`, a key `p > end` names the ancestor `(start, p)`, and
//! `p == end` is the no-strict-ancestor case used by the mu phase.

use crate::chart::{SpanChart, SplitChart};
use crate::error::{GrammarError, GrammarResult};
use crate::word::Sentence;

/// Dense realization of the four black-box grammar tables for one
/// sentence chart of length `len`.
#[derive(Clone, Debug)]
pub struct GrammarTables {
    len: usize,
    inside: SpanChart<f64>,
    inside_split: SplitChart<f64>,
    outside_with_parent: SpanChart<Vec<f64>>,
    mu_with_parent: SplitChart<Vec<f64>>,
}

impl GrammarTables {
    /// Tables of the given chart length with every entry zero.
    pub fn zeros(len: usize) -> GrammarResult<Self> {
        if len == 0 {
            return Err(GrammarError::EmptySentence);
        }
        Ok(Self {
            len,
            inside: SpanChart::new(len, 0.0),
            inside_split: SplitChart::new(len, 0.0),
            outside_with_parent: SpanChart::new(len, vec![0.0; len + 1]),
            mu_with_parent: SplitChart::new(len, vec![0.0; len + 1]),
        })
    }

    /// Tables with every entry set to `value`; handy for deterministic
    /// fixtures.
    pub fn filled(len: usize, value: f64) -> GrammarResult<Self> {
        let mut tables = Self::zeros(len)?;
        for start in 0..len {
            for end in (start + 1)..=len {
                tables.inside.set(start, end, value);
                tables
                    .outside_with_parent
                    .set(start, end, vec![value; len + 1]);
                for split in start..end {
                    tables.inside_split.set(start, end, split, value);
                    tables
                        .mu_with_parent
                        .set(start, end, split, vec![value; len + 1]);
                }
            }
        }
        Ok(tables)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check_span(&self, start: usize, end: usize) -> GrammarResult<()> {
        if start >= end || end > self.len {
            return Err(GrammarError::SpanOutOfBounds {
                start,
                end,
                len: self.len,
            });
        }
        Ok(())
    }

    fn check_split(&self, start: usize, end: usize, split: usize) -> GrammarResult<()> {
        self.check_span(start, end)?;
        if split < start || split >= end {
            return Err(GrammarError::SplitOutOfRange { start, end, split });
        }
        Ok(())
    }

    fn check_parent(&self, parent: usize) -> GrammarResult<()> {
        if parent > self.len {
            return Err(GrammarError::ParentOutOfRange {
                parent,
                len: self.len,
            });
        }
        Ok(())
    }

    /// Inside probability of span `(start, end)`.
    pub fn inside_span(&self, start: usize, end: usize) -> f64 {
        *self.inside.get(start, end)
    }

    /// Inside probability of span `(start, end)` decomposed at `split`.
    pub fn inside_span_split(&self, start: usize, end: usize, split: usize) -> f64 {
        *self.inside_split.get(start, end, split)
    }

    /// Outside probability of span `(start, end)` under the ancestor
    /// named by the `parent` boundary.
    pub fn outside_span_with_parent(&self, start: usize, end: usize, parent: usize) -> f64 {
        debug_assert!(parent <= self.len);
        self.outside_with_parent.get(start, end)[parent]
    }

    /// Posterior weight of `(start, end, split)` under the ancestor named
    /// by the `parent` boundary.
    pub fn mu_span_split_with_parent(
        &self,
        start: usize,
        end: usize,
        split: usize,
        parent: usize,
    ) -> f64 {
        debug_assert!(parent <= self.len);
        self.mu_with_parent.get(start, end, split)[parent]
    }

    pub fn set_inside_span(&mut self, start: usize, end: usize, value: f64) -> GrammarResult<()> {
        self.check_span(start, end)?;
        self.inside.set(start, end, value);
        Ok(())
    }

    pub fn set_inside_span_split(
        &mut self,
        start: usize,
        end: usize,
        split: usize,
        value: f64,
    ) -> GrammarResult<()> {
        self.check_split(start, end, split)?;
        self.inside_split.set(start, end, split, value);
        Ok(())
    }

    pub fn set_outside_span_with_parent(
        &mut self,
        start: usize,
        end: usize,
        parent: usize,
        value: f64,
    ) -> GrammarResult<()> {
        self.check_span(start, end)?;
        self.check_parent(parent)?;
        self.outside_with_parent.get_mut(start, end)[parent] = value;
        Ok(())
    }

    pub fn set_mu_span_split_with_parent(
        &mut self,
        start: usize,
        end: usize,
        split: usize,
        parent: usize,
        value: f64,
    ) -> GrammarResult<()> {
        self.check_split(start, end, split)?;
        self.check_parent(parent)?;
        self.mu_with_parent.get_mut(start, end, split)[parent] = value;
        Ok(())
    }

    /// Checks the split-sum invariant: for every span wider than one
    /// position, the inside-split scores must sum to the span's inside
    /// score within `tolerance`.
    pub fn validate(&self, tolerance: f64) -> GrammarResult<()> {
        for start in 0..self.len {
            for end in (start + 2)..=self.len {
                let expected = self.inside_span(start, end);
                let got: f64 = ((start + 1)..end)
                    .map(|split| self.inside_span_split(start, end, split))
                    .sum();
                if (got - expected).abs() > tolerance * expected.abs().max(1.0) {
                    return Err(GrammarError::SplitSumViolation {
                        start,
                        end,
                        expected,
                        got,
                    });
                }
            }
        }
        Ok(())
    }
}

/// A grammar score provider: anything that can produce the four tables
/// for a sentence.
pub trait Grammar {
    fn tables(&self, sentence: &Sentence) -> GrammarResult<GrammarTables>;
}

/// A provider that hands out one fixed, precomputed table set; used when
/// an external parser has already produced the tables, and by tests.
#[derive(Clone, Debug)]
pub struct PrecomputedGrammar {
    tables: GrammarTables,
}

impl PrecomputedGrammar {
    pub fn new(tables: GrammarTables) -> Self {
        Self { tables }
    }
}

impl Grammar for PrecomputedGrammar {
    fn tables(&self, sentence: &Sentence) -> GrammarResult<GrammarTables> {
        if sentence.len() != self.tables.len() {
            return Err(GrammarError::LengthMismatch {
                expected: self.tables.len(),
                got: sentence.len(),
            });
        }
        Ok(self.tables.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word::Word;

    #[test]
    fn zero_length_is_rejected() {
        assert!(matches!(
            GrammarTables::zeros(0),
            Err(GrammarError::EmptySentence)
        ));
    }

    #[test]
    fn setters_validate_indices() {
        let mut t = GrammarTables::zeros(3).unwrap();
        assert!(t.set_inside_span(0, 2, 0.5).is_ok());
        assert!(matches!(
            t.set_inside_span(2, 2, 0.5),
            Err(GrammarError::SpanOutOfBounds { .. })
        ));
        assert!(matches!(
            t.set_inside_span_split(0, 2, 2, 0.5),
            Err(GrammarError::SplitOutOfRange { .. })
        ));
        assert!(matches!(
            t.set_outside_span_with_parent(0, 2, 4, 0.5),
            Err(GrammarError::ParentOutOfRange { .. })
        ));
    }

    #[test]
    fn split_sum_invariant_holds_for_consistent_tables() {
        let mut t = GrammarTables::zeros(3).unwrap();
        // Span (0, 2): splits at 1 only.
        t.set_inside_span(0, 2, 0.3).unwrap();
        t.set_inside_span_split(0, 2, 1, 0.3).unwrap();
        // Span (0, 3): splits at 1 and 2.
        t.set_inside_span(0, 3, 0.5).unwrap();
        t.set_inside_span_split(0, 3, 1, 0.2).unwrap();
        t.set_inside_span_split(0, 3, 2, 0.3).unwrap();
        // Span (1, 3).
        t.set_inside_span(1, 3, 0.4).unwrap();
        t.set_inside_span_split(1, 3, 2, 0.4).unwrap();
        assert!(t.validate(1e-12).is_ok());

        t.set_inside_span_split(0, 3, 2, 0.4).unwrap();
        assert!(matches!(
            t.validate(1e-12),
            Err(GrammarError::SplitSumViolation { start: 0, end: 3, .. })
        ));
    }

    #[test]
    fn precomputed_grammar_checks_sentence_length() {
        let tables = GrammarTables::filled(2, 1.0).unwrap();
        let grammar = PrecomputedGrammar::new(tables);
        let two = Sentence::from_words(0, vec![Word::new("a", 0), Word::new("b", 1)]);
        assert!(grammar.tables(&two).is_ok());
        let three = two.clone().closed_with(Word::boundary(2));
        assert!(matches!(
            grammar.tables(&three),
            Err(GrammarError::LengthMismatch {
                expected: 2,
                got: 3
            })
        ));
    }
}
