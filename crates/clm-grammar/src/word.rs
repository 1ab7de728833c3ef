// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Surface form of the boundary token appended to close a chart.
pub const BOUNDARY: &str = "</s>";

/// A single token: surface string, vocabulary index (column of the
/// embedding matrix), and the normalized signature used for grammar
/// lookups. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    surface: String,
    index: usize,
    signature: String,
}

impl Word {
    /// Word whose signature equals its surface form.
    pub fn new(surface: impl Into<String>, index: usize) -> Self {
        let surface = surface.into();
        let signature = surface.clone();
        Self {
            surface,
            index,
            signature,
        }
    }

    /// Word with an explicit grammar signature.
    pub fn with_signature(
        surface: impl Into<String>,
        index: usize,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            surface: surface.into(),
            index,
            signature: signature.into(),
        }
    }

    /// The boundary token closing a sentence chart.
    pub fn boundary(index: usize) -> Self {
        Self::new(BOUNDARY, index)
    }

    pub fn surface(&self) -> &str {
        &self.surface
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }
}

/// An index-stable token sequence with a sentence id used for logging.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentence {
    id: usize,
    words: Vec<Word>,
}

impl Sentence {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            words: Vec::new(),
        }
    }

    pub fn from_words(id: usize, words: Vec<Word>) -> Self {
        Self { id, words }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn push(&mut self, word: Word) {
        self.words.push(word);
    }

    /// Number of tokens, including the boundary once appended.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Word> {
        self.words.get(index)
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn iter(&self) -> impl Iterator<Item = &Word> {
        self.words.iter()
    }

    /// Returns the sentence with the chart-closing boundary token
    /// appended.
    pub fn closed_with(mut self, boundary: Word) -> Self {
        self.words.push(boundary);
        self
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for word in &self.words {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", word.surface())?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_word_uses_marker_surface() {
        let b = Word::boundary(7);
        assert_eq!(b.surface(), BOUNDARY);
        assert_eq!(b.index(), 7);
    }

    #[test]
    fn closed_with_appends_one_token() {
        let s = Sentence::from_words(3, vec![Word::new("the", 0), Word::new("cat", 1)]);
        let closed = s.closed_with(Word::boundary(2));
        assert_eq!(closed.len(), 3);
        assert_eq!(closed.get(2).unwrap().surface(), BOUNDARY);
        assert_eq!(closed.id(), 3);
    }

    #[test]
    fn display_joins_surfaces() {
        let s = Sentence::from_words(0, vec![Word::new("a", 0), Word::new("b", 1)]);
        assert_eq!(s.to_string(), "a b");
    }
}
