//! Character-level tokeniser for SpeechT5.
//!
//! SpeechT5 uses a SentencePiece *character* vocabulary: every input
//! character is its own piece, word boundaries are the meta-symbol `▁`
//! (U+2581), and the sequence ends with `</s>`. The vocabulary is read from
//! the model's `vocab.json` (`piece → id`), so ids always match the graph.
//!
//! Characters missing from the vocabulary are looked up lower-cased, then
//! mapped to `<unk>`; nothing is rejected. Output is hard-truncated to the
//! configured budget with `</s>` kept last.

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// SentencePiece word-boundary meta-symbol.
const WORD_BOUNDARY: char = '\u{2581}';

const EOS: &str = "</s>";
const UNK: &str = "<unk>";

/// Runs of whitespace (including newlines and tabs) collapse to one space.
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapse whitespace runs and trim; control characters are dropped.
pub fn normalize_text(text: &str) -> String {
    let visible: String = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();
    RE_WHITESPACE.replace_all(visible.trim(), " ").into_owned()
}

#[derive(Debug, Clone)]
pub struct CharTokenizer {
    vocab: HashMap<char, i64>,
    boundary: i64,
    unk: i64,
    eos: i64,
    max_tokens: usize,
}

impl CharTokenizer {
    /// Load a `vocab.json` (`{"<s>": 0, "<pad>": 1, "</s>": 2, ...}`).
    pub fn from_vocab_json(path: &Path, max_tokens: usize) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Cannot read vocab: {}", path.display()))?;
        let pieces: HashMap<String, i64> =
            serde_json::from_slice(&bytes).context("Failed to parse vocab.json")?;
        Self::from_pieces(pieces, max_tokens)
    }

    /// Build from a `piece → id` map. Multi-character pieces other than the
    /// special tokens are ignored; a character vocabulary has none.
    pub fn from_pieces(pieces: HashMap<String, i64>, max_tokens: usize) -> Result<Self> {
        let special = |name: &str| {
            pieces
                .get(name)
                .copied()
                .with_context(|| format!("vocab is missing the '{}' token", name))
        };
        let eos = special(EOS)?;
        let unk = special(UNK)?;

        let mut vocab = HashMap::new();
        for (piece, id) in &pieces {
            let mut chars = piece.chars();
            if let (Some(c), None) = (chars.next(), chars.next()) {
                vocab.insert(c, *id);
            }
        }
        let boundary = vocab
            .get(&WORD_BOUNDARY)
            .copied()
            .with_context(|| format!("vocab is missing the word boundary '{}'", WORD_BOUNDARY))?;

        Ok(Self { vocab, boundary, unk, eos, max_tokens: max_tokens.max(1) })
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    fn char_id(&self, c: char) -> i64 {
        if c == ' ' {
            return self.boundary;
        }
        if let Some(&id) = self.vocab.get(&c) {
            return id;
        }
        c.to_lowercase()
            .next()
            .and_then(|lc| self.vocab.get(&lc).copied())
            .unwrap_or(self.unk)
    }

    /// Token ids for `text`: `▁` + characters (spaces → `▁`) + `</s>`,
    /// truncated to [`max_tokens`](Self::max_tokens).
    pub fn encode(&self, text: &str) -> Vec<i64> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return Vec::new();
        }
        let budget = self.max_tokens - 1;
        let mut ids: Vec<i64> = std::iter::once(self.boundary)
            .chain(normalized.chars().map(|c| self.char_id(c)))
            .take(budget)
            .collect();
        ids.push(self.eos);
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer(max_tokens: usize) -> CharTokenizer {
        let pieces: HashMap<String, i64> = [
            ("<s>", 0),
            ("<pad>", 1),
            ("</s>", 2),
            ("<unk>", 3),
            ("\u{2581}", 4),
            ("e", 5),
            ("h", 6),
            ("l", 7),
            ("o", 8),
            ("w", 9),
            ("r", 10),
            ("d", 11),
            ("!", 12),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        CharTokenizer::from_pieces(pieces, max_tokens).unwrap()
    }

    #[test]
    fn test_encode_hello_world() {
        let ids = tokenizer(600).encode("Hello world!");
        assert_eq!(ids, vec![4, 6, 5, 7, 7, 8, 4, 9, 8, 10, 7, 11, 12, 2]);
    }

    #[test]
    fn test_unknown_maps_to_unk() {
        let ids = tokenizer(600).encode("h中");
        assert_eq!(ids, vec![4, 6, 3, 2]);
    }

    #[test]
    fn test_whitespace_is_collapsed() {
        let t = tokenizer(600);
        assert_eq!(t.encode("  hello\n\n\tworld "), t.encode("hello world"));
    }

    #[test]
    fn test_empty_text() {
        assert!(tokenizer(600).encode("   ").is_empty());
        assert!(tokenizer(600).encode("").is_empty());
    }

    #[test]
    fn test_truncates_to_budget() {
        let t = tokenizer(10);
        let ids = t.encode(&"hello ".repeat(100));
        assert_eq!(ids.len(), 10);
        assert_eq!(*ids.last().unwrap(), 2);
    }

    #[test]
    fn test_missing_special_token_is_error() {
        let pieces: HashMap<String, i64> =
            [("</s>".to_string(), 2), ("\u{2581}".to_string(), 4)].into_iter().collect();
        assert!(CharTokenizer::from_pieces(pieces, 600).is_err());
    }

    #[test]
    fn test_normalize_text_drops_controls() {
        assert_eq!(normalize_text("a\u{0007}b  c\r\n"), "ab c");
    }
}
