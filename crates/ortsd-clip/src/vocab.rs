//! Vocabulary and BPE merge tables
//!
//! A vocabulary is either newline-delimited (line number = id) or a JSON
//! object mapping token to id. Merges are whitespace-separated pairs ranked by
//! line order, with an optional `#version` header.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::tokenizer::TokenizerError;

pub const START_TOKEN: &str = "<|startoftext|>";
pub const END_TOKEN: &str = "<|endoftext|>";

/// Token <-> id table
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    encoder: HashMap<String, u32>,
    decoder: HashMap<u32, String>,
}

impl Vocabulary {
    /// Load a vocabulary file, JSON when the extension is `.json`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TokenizerError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let vocab = if is_json {
            Self::from_json(&content)?
        } else {
            Self::from_lines(&content)
        };
        if vocab.is_empty() {
            return Err(TokenizerError::InvalidVocab);
        }

        info!(path = %path.display(), tokens = vocab.len(), "loaded vocabulary");
        Ok(vocab)
    }

    /// One token per line, the line index is the id
    pub fn from_lines(content: &str) -> Self {
        let mut vocab = Self::default();
        for (id, line) in content.lines().enumerate() {
            let token = line.trim_end_matches('\r');
            if !token.is_empty() {
                vocab.insert(token.to_string(), id as u32);
            }
        }
        vocab
    }

    /// A JSON object `{"token": id, ...}`
    pub fn from_json(content: &str) -> Result<Self, TokenizerError> {
        let encoder: HashMap<String, u32> = serde_json::from_str(content)?;
        let decoder = encoder.iter().map(|(k, &v)| (v, k.clone())).collect();
        Ok(Self { encoder, decoder })
    }

    /// Build the CLIP vocabulary from merges
    ///
    /// Order: the 256 byte symbols, the same with `</w>`, one entry per merge
    /// (capped so the total is `vocab_size`), then the start and end markers
    /// at `vocab_size - 2` and `vocab_size - 1`.
    pub fn from_merges(merges: &MergeRanks, byte_symbols: &[char], vocab_size: usize) -> Self {
        let mut vocab = Self::default();
        let mut next = 0u32;
        let mut add = |vocab: &mut Self, token: String| {
            vocab.insert(token, next);
            next += 1;
        };

        for c in byte_symbols {
            add(&mut vocab, c.to_string());
        }
        for c in byte_symbols {
            add(&mut vocab, format!("{c}</w>"));
        }

        let merge_count = vocab_size.saturating_sub(byte_symbols.len() * 2 + 2);
        for (first, second) in merges.ordered().into_iter().take(merge_count) {
            add(&mut vocab, format!("{first}{second}"));
        }

        // Markers sit at the top of the id range even when merges run short
        let start = next.max(vocab_size.saturating_sub(2) as u32);
        vocab.insert(START_TOKEN.to_string(), start);
        vocab.insert(END_TOKEN.to_string(), start + 1);
        vocab
    }

    fn insert(&mut self, token: String, id: u32) {
        self.decoder.insert(id, token.clone());
        self.encoder.insert(token, id);
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.encoder.get(token).copied()
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.decoder.get(&id).map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.encoder.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.encoder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoder.is_empty()
    }
}

/// BPE merge ranks, lower merges first
#[derive(Debug, Clone, Default)]
pub struct MergeRanks {
    ranks: HashMap<(String, String), usize>,
}

impl MergeRanks {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TokenizerError> {
        let content = fs::read_to_string(path.as_ref())?;
        let merges = Self::parse(&content);
        info!(path = %path.as_ref().display(), merges = merges.len(), "loaded merges");
        Ok(merges)
    }

    /// Parse merge lines, skipping a `#version` header
    pub fn parse(content: &str) -> Self {
        let lines = content
            .lines()
            .skip_while(|line| line.starts_with("#version"));

        let mut ranks = HashMap::new();
        for line in lines {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if let [first, second] = parts.as_slice() {
                let rank = ranks.len();
                ranks
                    .entry((first.to_string(), second.to_string()))
                    .or_insert(rank);
            }
        }
        Self { ranks }
    }

    pub fn rank(&self, pair: &(String, String)) -> Option<usize> {
        self.ranks.get(pair).copied()
    }

    /// Pairs sorted by rank
    pub fn ordered(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<_> = self.ranks.iter().collect();
        pairs.sort_by_key(|entry| *entry.1);
        pairs
            .into_iter()
            .map(|((a, b), _)| (a.as_str(), b.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_use_line_number_as_id() {
        let vocab = Vocabulary::from_lines("a</w>\nb</w>\r\n\nc</w>\n");
        assert_eq!(vocab.id("a</w>"), Some(0));
        assert_eq!(vocab.id("b</w>"), Some(1));
        assert_eq!(vocab.id("c</w>"), Some(3));
        assert_eq!(vocab.token(3), Some("c</w>"));
        assert_eq!(vocab.len(), 3);
    }

    #[test]
    fn test_json_vocab() {
        let vocab = Vocabulary::from_json(r#"{"cat</w>": 7, "<|endoftext|>": 9}"#).unwrap();
        assert_eq!(vocab.id("cat</w>"), Some(7));
        assert_eq!(vocab.token(9), Some(END_TOKEN));
        assert!(Vocabulary::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_merges_skip_version_header() {
        let merges = MergeRanks::parse("#version: 0.2\nc a\nca t</w>\nbad line here\n");
        assert_eq!(merges.len(), 2);
        assert_eq!(merges.rank(&("c".into(), "a".into())), Some(0));
        assert_eq!(merges.rank(&("ca".into(), "t</w>".into())), Some(1));
        assert_eq!(merges.ordered(), vec![("c", "a"), ("ca", "t</w>")]);
    }

    #[test]
    fn test_vocab_from_merges() {
        let merges = MergeRanks::parse("c a\nca t</w>\n");
        let symbols = ['a', 'c', 't'];
        let vocab = Vocabulary::from_merges(&merges, &symbols, 100);
        assert_eq!(vocab.id("a"), Some(0));
        assert_eq!(vocab.id("a</w>"), Some(3));
        assert_eq!(vocab.id("ca"), Some(6));
        assert_eq!(vocab.id("cat</w>"), Some(7));
        assert_eq!(vocab.id(START_TOKEN), Some(98));
        assert_eq!(vocab.id(END_TOKEN), Some(99));
    }

    #[test]
    fn test_vocab_from_merges_caps_merge_count() {
        let merges = MergeRanks::parse("c a\nca t</w>\n");
        let symbols = ['a', 'c', 't'];
        // 6 byte symbols + 1 merge + 2 markers
        let vocab = Vocabulary::from_merges(&merges, &symbols, 9);
        assert_eq!(vocab.len(), 9);
        assert!(vocab.contains("ca"));
        assert!(!vocab.contains("cat</w>"));
    }
}
