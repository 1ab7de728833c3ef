// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::error::{GrammarError, GrammarResult};
use crate::word::Word;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maps surface strings to embedding-matrix columns and resolves unseen
/// words through a cascade of case normalizations before falling back to
/// the unknown marker.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Vocabulary {
    indices: HashMap<String, usize>,
    entries: Vec<String>,
    unknown: Option<usize>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a signature, returning its index. Re-inserting an
    /// existing signature returns the original index.
    pub fn insert(&mut self, signature: impl Into<String>) -> usize {
        let signature = signature.into();
        if let Some(&index) = self.indices.get(&signature) {
            return index;
        }
        let index = self.entries.len();
        self.indices.insert(signature.clone(), index);
        self.entries.push(signature);
        index
    }

    /// Registers `marker` as the unknown-word fallback.
    pub fn insert_unknown(&mut self, marker: impl Into<String>) -> usize {
        let index = self.insert(marker);
        self.unknown = Some(index);
        index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index_of(&self, signature: &str) -> Option<usize> {
        self.indices.get(signature).copied()
    }

    pub fn signature(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    /// Builds a [`Word`] for a raw surface form. The signature is
    /// resolved by trying the surface as given, then lowercased,
    /// uppercased, and capitalized, before falling back to the unknown
    /// marker.
    pub fn token(&self, surface: &str) -> GrammarResult<Word> {
        for candidate in [
            surface.to_string(),
            surface.to_lowercase(),
            surface.to_uppercase(),
            capitalize(surface),
        ] {
            if let Some(index) = self.index_of(&candidate) {
                return Ok(Word::with_signature(surface, index, candidate));
            }
        }
        match self.unknown {
            Some(index) => {
                let marker = self.entries[index].clone();
                Ok(Word::with_signature(surface, index, marker))
            }
            None => Err(GrammarError::UnknownWord {
                surface: surface.to_string(),
            }),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        let mut v = Vocabulary::new();
        v.insert("the");
        v.insert("Paris");
        v.insert("NATO");
        v.insert_unknown("<unk>");
        v
    }

    #[test]
    fn exact_match_wins() {
        let v = vocab();
        let w = v.token("the").unwrap();
        assert_eq!(w.index(), 0);
        assert_eq!(w.signature(), "the");
    }

    #[test]
    fn case_cascade_resolves_variants() {
        let v = vocab();
        assert_eq!(v.token("The").unwrap().signature(), "the");
        assert_eq!(v.token("nato").unwrap().signature(), "NATO");
        assert_eq!(v.token("paris").unwrap().signature(), "Paris");
    }

    #[test]
    fn unknown_marker_is_last_resort() {
        let v = vocab();
        let w = v.token("zyzzyva").unwrap();
        assert_eq!(w.signature(), "<unk>");
        assert_eq!(w.surface(), "zyzzyva");
    }

    #[test]
    fn missing_unknown_marker_is_an_error() {
        let mut v = Vocabulary::new();
        v.insert("only");
        assert!(matches!(
            v.token("other"),
            Err(GrammarError::UnknownWord { .. })
        ));
    }
}
