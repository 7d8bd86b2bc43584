//! Prompt tokenizer
//!
//! Turns a weighted prompt into fixed-size chunks of token ids and per-token
//! weights, ready for the text encoder. Pieces come from CLIP byte-level BPE
//! or from a word-piece vocabulary.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;

use burn::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::prompt::{PromptAttentionParser, BREAK_TEXT, BREAK_WEIGHT};
use crate::vocab::{MergeRanks, Vocabulary, END_TOKEN, START_TOKEN};

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid vocabulary file format")]
    InvalidVocab,

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Invalid tokenizer config: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),
}

/// CLIP pre-tokenization pattern
const PRE_TOKEN_PATTERN: &str =
    r"(?i)<\|startoftext\|>|<\|endoftext\|>|'s|'t|'re|'ve|'m|'ll|'d|[\p{L}]+|[\p{N}]|[^\s\p{L}\p{N}]+";

/// Clause separator used to pick chunk split points
const SEPARATOR: &str = ",";

// ============================================================================
// Configuration
// ============================================================================

/// Piece encoding scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// CLIP byte-level byte pair encoding
    #[default]
    Bpe,
    /// Whole-word lookup with greedy longest-prefix fallback
    WordPiece,
}

/// Tokenizer options record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    pub kind: TokenizerKind,
    /// Vocabulary file; BPE builds one from the merges when absent
    pub vocab_path: Option<PathBuf>,
    /// BPE merges file
    pub merges_path: Option<PathBuf>,
    pub vocab_size: usize,
    /// Tokens per chunk including start and end markers
    pub chunk_size: usize,
    /// Width of the text encoder hidden state
    pub hidden_dim: usize,
    /// Weight of start, end and padding tokens
    pub boundary_weight: f32,
    pub increase_factor: f32,
    pub decrease_factor: f32,
    /// How far back a separator may be to split a full chunk on it
    pub comma_padding_backtrack: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            kind: TokenizerKind::Bpe,
            vocab_path: None,
            merges_path: None,
            vocab_size: 49408,
            chunk_size: 77,
            hidden_dim: 768,
            boundary_weight: 1.0,
            increase_factor: 1.1,
            decrease_factor: 1.0 / 1.1,
            comma_padding_backtrack: 20,
        }
    }
}

impl TokenizerConfig {
    pub fn validate(&self) -> Result<(), TokenizerError> {
        let problem = if self.chunk_size < 3 {
            Some(format!("chunk_size must be at least 3, got {}", self.chunk_size))
        } else if self.vocab_size < 2 {
            Some(format!("vocab_size must be at least 2, got {}", self.vocab_size))
        } else if self.hidden_dim == 0 {
            Some("hidden_dim must be greater than zero".to_string())
        } else {
            None
        };
        problem.map_or(Ok(()), invalid)
    }

    /// Check that the files needed by `kind` are configured
    pub fn validate_paths(&self) -> Result<(), TokenizerError> {
        match self.kind {
            TokenizerKind::WordPiece if self.vocab_path.is_none() => {
                invalid("word-piece tokenizer needs vocab_path".to_string())
            }
            TokenizerKind::Bpe if self.vocab_path.is_none() && self.merges_path.is_none() => {
                invalid("BPE tokenizer needs merges_path or vocab_path".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Tokens available for prompt text in one chunk
    pub fn body_size(&self) -> usize {
        self.chunk_size - 2
    }
}

fn invalid(message: String) -> Result<(), TokenizerError> {
    error!(%message, "invalid tokenizer config");
    Err(TokenizerError::InvalidConfig(message))
}

// ============================================================================
// Token Chunks
// ============================================================================

/// One encoder window: `[start, body..., padding..., end]`
#[derive(Debug, Clone, PartialEq)]
pub struct TokenChunk {
    pub tokens: Vec<u32>,
    pub weights: Vec<f32>,
}

impl TokenChunk {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Token ids as `[1, len]` i32 data for the text encoder
    pub fn ids_data(&self) -> TensorData {
        let ids: Vec<i32> = self.tokens.iter().map(|&t| t as i32).collect();
        TensorData::new(ids, [1, self.tokens.len()])
    }

    /// Per-token weights as a tensor
    pub fn weights_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1> {
        Tensor::from_data(
            TensorData::new(self.weights.clone(), [self.weights.len()]),
            device,
        )
    }
}

/// Accumulates tokens into chunks, splitting full chunks on separators
struct ChunkBuilder {
    body_size: usize,
    backtrack: usize,
    start: u32,
    end: u32,
    boundary_weight: f32,
    tokens: Vec<u32>,
    weights: Vec<f32>,
    last_separator: Option<usize>,
    chunks: Vec<TokenChunk>,
}

impl ChunkBuilder {
    fn push(&mut self, token: u32, weight: f32, is_separator: bool) {
        if self.tokens.len() == self.body_size {
            match self.last_separator {
                Some(at) if self.tokens.len() - at <= self.backtrack => {
                    let tail = self.tokens.split_off(at + 1);
                    let tail_weights = self.weights.split_off(at + 1);
                    self.flush();
                    self.tokens = tail;
                    self.weights = tail_weights;
                }
                _ => self.flush(),
            }
        }

        if is_separator {
            self.last_separator = Some(self.tokens.len());
        }
        self.tokens.push(token);
        self.weights.push(weight);
    }

    /// Close the current chunk if it holds anything
    fn split(&mut self) {
        if !self.tokens.is_empty() {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let padding = self.body_size - self.tokens.len();

        let mut tokens = Vec::with_capacity(self.body_size + 2);
        tokens.push(self.start);
        tokens.append(&mut self.tokens);
        tokens.extend(std::iter::repeat(self.end).take(padding + 1));

        let mut weights = Vec::with_capacity(self.body_size + 2);
        weights.push(self.boundary_weight);
        weights.append(&mut self.weights);
        weights.extend(std::iter::repeat(self.boundary_weight).take(padding + 1));

        self.chunks.push(TokenChunk { tokens, weights });
        self.last_separator = None;
    }

    fn finish(mut self) -> Vec<TokenChunk> {
        if !self.tokens.is_empty() || self.chunks.is_empty() {
            self.flush();
        }
        self.chunks
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

/// Pre-tokens memoized by `bpe` before the memo is dropped
const BPE_CACHE_CAPACITY: usize = 4096;

/// Weighted prompt tokenizer
pub struct Tokenizer {
    config: TokenizerConfig,
    parser: PromptAttentionParser,
    vocab: Vocabulary,
    bpe_ranks: MergeRanks,
    byte_encoder: HashMap<u8, char>,
    byte_decoder: HashMap<char, u8>,
    cache: RefCell<HashMap<String, Vec<String>>>,
    cache_capacity: usize,
    pat: Regex,
    start_id: u32,
    end_id: u32,
    separator_id: Option<u32>,
}

impl Tokenizer {
    /// Load vocabulary and merges from the paths in `config`
    pub fn new(config: TokenizerConfig) -> Result<Self, TokenizerError> {
        config.validate()?;
        config.validate_paths()?;

        let bpe_ranks = match (&config.kind, &config.merges_path) {
            (TokenizerKind::Bpe, Some(path)) => MergeRanks::from_file(path)?,
            _ => MergeRanks::default(),
        };
        let vocab = match &config.vocab_path {
            Some(path) => Vocabulary::from_file(path)?,
            None => {
                let symbols: Vec<char> = bytes_to_unicode().into_iter().map(|(_, c)| c).collect();
                Vocabulary::from_merges(&bpe_ranks, &symbols, config.vocab_size)
            }
        };

        Self::from_parts(config, vocab, bpe_ranks)
    }

    /// Build from an already loaded vocabulary and merge table
    pub fn from_parts(
        config: TokenizerConfig,
        vocab: Vocabulary,
        bpe_ranks: MergeRanks,
    ) -> Result<Self, TokenizerError> {
        config.validate()?;
        if vocab.is_empty() {
            return Err(TokenizerError::InvalidVocab);
        }

        let byte_encoder: HashMap<u8, char> = bytes_to_unicode().into_iter().collect();
        let byte_decoder = byte_encoder.iter().map(|(&k, &v)| (v, k)).collect();

        let start_id = vocab
            .id(START_TOKEN)
            .unwrap_or((config.vocab_size - 2) as u32);
        let end_id = vocab.id(END_TOKEN).unwrap_or((config.vocab_size - 1) as u32);
        let separator_id = vocab.id(&format!("{SEPARATOR}</w>"));

        let parser = PromptAttentionParser::new(config.increase_factor, config.decrease_factor)?;
        let pat = Regex::new(PRE_TOKEN_PATTERN)?;

        Ok(Self {
            config,
            parser,
            vocab,
            bpe_ranks,
            byte_encoder,
            byte_decoder,
            cache: RefCell::new(HashMap::new()),
            cache_capacity: BPE_CACHE_CAPACITY,
            pat,
            start_id,
            end_id,
            separator_id,
        })
    }

    /// Parse the weighting syntax and split the prompt into chunks
    pub fn tokenize(&self, prompt: &str) -> Vec<TokenChunk> {
        let mut builder = ChunkBuilder {
            body_size: self.config.body_size(),
            backtrack: self.config.comma_padding_backtrack,
            start: self.start_id,
            end: self.end_id,
            boundary_weight: self.config.boundary_weight,
            tokens: Vec::new(),
            weights: Vec::new(),
            last_separator: None,
            chunks: Vec::new(),
        };

        for (text, weight) in self.parser.parse(prompt) {
            if text == BREAK_TEXT && weight == BREAK_WEIGHT {
                builder.split();
                continue;
            }
            for token in self.encode(&text) {
                builder.push(token, weight, Some(token) == self.separator_id);
            }
        }

        let chunks = builder.finish();
        debug!(chunks = chunks.len(), "tokenized prompt");
        chunks
    }

    /// Chunk for an empty prompt
    pub fn unconditional_chunk(&self) -> TokenChunk {
        let size = self.config.chunk_size;
        let mut tokens = vec![self.end_id; size];
        tokens[0] = self.start_id;
        TokenChunk {
            tokens,
            weights: vec![self.config.boundary_weight; size],
        }
    }

    /// Encode plain text to token ids without chunking
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let text = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        let mut tokens = Vec::new();
        for mat in self.pat.find_iter(&text) {
            let pieces = match self.config.kind {
                TokenizerKind::Bpe => self.bpe(mat.as_str()),
                TokenizerKind::WordPiece => self.word_pieces(mat.as_str()),
            };
            for piece in pieces {
                match self.vocab.id(&piece) {
                    Some(id) => tokens.push(id),
                    None => warn!(%piece, "dropping piece missing from vocabulary"),
                }
            }
        }
        tokens
    }

    /// Decode a chunk back to text, skipping start and end markers
    pub fn untokenize(&self, chunk: &TokenChunk) -> String {
        let text: String = chunk
            .tokens
            .iter()
            .filter(|&&id| id != self.start_id && id != self.end_id)
            .filter_map(|&id| self.vocab.token(id))
            .collect();

        let text = match self.config.kind {
            TokenizerKind::Bpe => {
                let bytes: Vec<u8> = text
                    .replace("</w>", " ")
                    .chars()
                    .filter_map(|c| match c {
                        ' ' => Some(b' '),
                        c => self.byte_decoder.get(&c).copied(),
                    })
                    .collect();
                String::from_utf8_lossy(&bytes).into_owned()
            }
            TokenizerKind::WordPiece => text.replace("</w>", " "),
        };

        text.trim().to_string()
    }

    /// Apply BPE to one pre-token
    fn bpe(&self, token: &str) -> Vec<String> {
        if let Some(cached) = self.cache.borrow().get(token) {
            return cached.clone();
        }

        let mut word: Vec<String> = token
            .bytes()
            .filter_map(|b| self.byte_encoder.get(&b))
            .map(|c| c.to_string())
            .collect();

        if word.is_empty() {
            return Vec::new();
        }

        // Add end-of-word marker to last character
        if let Some(last) = word.last_mut() {
            last.push_str("</w>");
        }

        // Iteratively merge the lowest ranked pair
        loop {
            let pairs = get_pairs(&word);
            let min_pair = pairs
                .iter()
                .filter_map(|pair| self.bpe_ranks.rank(pair).map(|rank| (pair, rank)))
                .min_by_key(|&(_, rank)| rank);

            let Some((bigram, _)) = min_pair else {
                break;
            };

            let mut new_word = Vec::with_capacity(word.len());
            let mut i = 0;
            while i < word.len() {
                if i + 1 < word.len() && word[i] == bigram.0 && word[i + 1] == bigram.1 {
                    new_word.push(format!("{}{}", bigram.0, bigram.1));
                    i += 2;
                } else {
                    new_word.push(word[i].clone());
                    i += 1;
                }
            }
            word = new_word;
        }

        let mut cache = self.cache.borrow_mut();
        if cache.len() >= self.cache_capacity {
            debug!(entries = cache.len(), "clearing BPE cache");
            cache.clear();
        }
        cache.insert(token.to_string(), word.clone());
        word
    }

    /// Whole word if known, otherwise greedy longest-prefix pieces
    fn word_pieces(&self, word: &str) -> Vec<String> {
        let whole = format!("{word}</w>");
        if self.vocab.contains(&whole) {
            return vec![whole];
        }

        let boundaries: Vec<usize> = word
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(word.len()))
            .collect();

        let mut pieces = Vec::new();
        let mut from = 0;
        while from + 1 < boundaries.len() {
            let found = (from + 1..boundaries.len()).rev().find_map(|to| {
                let mut piece = word[boundaries[from]..boundaries[to]].to_string();
                if to + 1 == boundaries.len() {
                    piece.push_str("</w>");
                }
                self.vocab.contains(&piece).then_some((piece, to))
            });

            match found {
                Some((piece, to)) => {
                    pieces.push(piece);
                    from = to;
                }
                None => {
                    let skipped = &word[boundaries[from]..boundaries[from + 1]];
                    warn!(%skipped, %word, "no word piece matches");
                    from += 1;
                }
            }
        }
        pieces
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn start_id(&self) -> u32 {
        self.start_id
    }

    pub fn end_id(&self) -> u32 {
        self.end_id
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    pub fn hidden_dim(&self) -> usize {
        self.config.hidden_dim
    }
}

/// Get all adjacent pairs in a word
fn get_pairs(word: &[String]) -> Vec<(String, String)> {
    word.windows(2)
        .map(|w| (w[0].clone(), w[1].clone()))
        .collect()
}

/// Build byte-to-unicode mapping in CLIP order
///
/// Printable bytes map to themselves; the rest are shifted past U+00FF so
/// every byte has a visible symbol.
pub fn bytes_to_unicode() -> Vec<(u8, char)> {
    let mut bs: Vec<u8> = Vec::new();
    bs.extend(b'!'..=b'~');
    bs.extend(b'\xa1'..=b'\xac');
    bs.extend(b'\xae'..=b'\xff');

    let mut mapping: Vec<(u8, char)> = bs.iter().map(|&b| (b, b as char)).collect();

    let mut n = 0u32;
    for b in 0u8..=255 {
        if !bs.contains(&b) {
            if let Some(c) = char::from_u32(256 + n) {
                mapping.push((b, c));
            }
            n += 1;
        }
    }

    mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_piece_tokenizer(words: &[&str], chunk_size: usize) -> Tokenizer {
        let mut lines: Vec<String> = words.iter().map(|w| format!("{w}</w>")).collect();
        lines.push(",</w>".to_string());
        lines.push(START_TOKEN.to_string());
        lines.push(END_TOKEN.to_string());
        let vocab = Vocabulary::from_lines(&lines.join("\n"));
        let config = TokenizerConfig {
            kind: TokenizerKind::WordPiece,
            chunk_size,
            ..Default::default()
        };
        Tokenizer::from_parts(config, vocab, MergeRanks::default()).unwrap()
    }

    #[test]
    fn test_bytes_to_unicode() {
        let mapping: HashMap<u8, char> = bytes_to_unicode().into_iter().collect();
        assert_eq!(mapping.len(), 256);

        // Check printable ASCII maps to itself
        assert_eq!(mapping.get(&b'a'), Some(&'a'));
        assert_eq!(mapping.get(&b'Z'), Some(&'Z'));
        assert_eq!(mapping.get(&b'5'), Some(&'5'));
        assert_eq!(mapping.get(&b' '), Some(&'\u{120}'));
    }

    #[test]
    fn test_bpe_cache_is_bounded() {
        let merges = MergeRanks::parse("#version: 0.2\nc a\nca t</w>");
        let vocab = Vocabulary::from_lines("cat</w>");
        let mut tokenizer =
            Tokenizer::from_parts(TokenizerConfig::default(), vocab, merges).unwrap();
        tokenizer.cache_capacity = 2;

        assert_eq!(tokenizer.encode("cat"), vec![0]);
        tokenizer.encode("cat dog");
        assert_eq!(tokenizer.cache.borrow().len(), 2);

        tokenizer.encode("bird");
        assert_eq!(tokenizer.cache.borrow().len(), 1);
        assert_eq!(tokenizer.encode("cat"), vec![0]);
    }

    #[test]
    fn test_markers_come_from_vocab() {
        let tokenizer = word_piece_tokenizer(&["cat"], 8);
        assert_eq!(tokenizer.start_id(), 2);
        assert_eq!(tokenizer.end_id(), 3);
    }

    #[test]
    fn test_markers_fall_back_to_vocab_size() {
        let vocab = Vocabulary::from_lines("cat</w>");
        let config = TokenizerConfig {
            kind: TokenizerKind::WordPiece,
            vocab_size: 100,
            ..Default::default()
        };
        let tokenizer = Tokenizer::from_parts(config, vocab, MergeRanks::default()).unwrap();
        assert_eq!(tokenizer.start_id(), 98);
        assert_eq!(tokenizer.end_id(), 99);
    }

    #[test]
    fn test_empty_prompt_is_one_unconditional_chunk() {
        let tokenizer = word_piece_tokenizer(&["cat"], 6);
        let chunks = tokenizer.tokenize("");
        assert_eq!(chunks, vec![tokenizer.unconditional_chunk()]);
        assert_eq!(chunks[0].tokens, vec![2, 3, 3, 3, 3, 3]);
    }

    #[test]
    fn test_weights_follow_runs() {
        let tokenizer = word_piece_tokenizer(&["a", "b"], 6);
        let chunks = tokenizer.tokenize("a (b)");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].tokens, vec![3, 0, 1, 4, 4, 4]);
        let expected = [1.0, 1.0, 1.1, 1.0, 1.0, 1.0];
        for (w, e) in chunks[0].weights.iter().zip(expected) {
            assert!((w - e).abs() < 1e-6);
        }
    }

    #[test]
    fn test_full_body_fits_one_chunk() {
        let tokenizer = word_piece_tokenizer(&["cat"], 6);
        let chunks = tokenizer.tokenize("cat cat cat cat");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].tokens, vec![2, 0, 0, 0, 0, 3]);
    }

    #[test]
    fn test_separator_moves_tail_to_next_chunk() {
        let tokenizer = word_piece_tokenizer(&["a", "b"], 6);
        // body size 4: "a , b b" is full, the next "b" splits after the comma
        let chunks = tokenizer.tokenize("a, b b b");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].tokens, vec![3, 0, 2, 4, 4, 4]);
        assert_eq!(chunks[1].tokens, vec![3, 1, 1, 1, 4, 4]);
    }

    #[test]
    fn test_break_closes_chunk() {
        let tokenizer = word_piece_tokenizer(&["a", "b"], 6);
        let chunks = tokenizer.tokenize("a BREAK b");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].tokens, vec![3, 0, 4, 4, 4, 4]);
        assert_eq!(chunks[1].tokens, vec![3, 1, 4, 4, 4, 4]);
    }

    #[test]
    fn test_word_piece_prefix_fallback() {
        let vocab = Vocabulary::from_lines("cat\ns</w>\ndog</w>");
        let config = TokenizerConfig {
            kind: TokenizerKind::WordPiece,
            ..Default::default()
        };
        let tokenizer = Tokenizer::from_parts(config, vocab, MergeRanks::default()).unwrap();
        assert_eq!(tokenizer.encode("cats dog"), vec![0, 1, 2]);
        // unknown characters are dropped
        assert_eq!(tokenizer.encode("xcats"), vec![0, 1]);
    }

    #[test]
    fn test_bpe_merges() {
        let merges = MergeRanks::parse("#version: 0.2\nc a\nca t</w>\n");
        let symbols: Vec<char> = bytes_to_unicode().into_iter().map(|(_, c)| c).collect();
        let vocab = Vocabulary::from_merges(&merges, &symbols, 49408);
        let tokenizer =
            Tokenizer::from_parts(TokenizerConfig::default(), vocab, merges).unwrap();

        let cat = tokenizer.vocab().id("cat</w>").unwrap();
        let ca = tokenizer.vocab().id("ca").unwrap();
        let t = tokenizer.vocab().id("t").unwrap();
        let s = tokenizer.vocab().id("s</w>").unwrap();
        assert_eq!(tokenizer.encode("Cat"), vec![cat]);
        assert_eq!(tokenizer.encode("cats"), vec![ca, t, s]);

        let chunk = &tokenizer.tokenize("cat cats")[0];
        assert_eq!(chunk.len(), 77);
        assert_eq!(tokenizer.untokenize(chunk), "cat cats");
    }

    #[test]
    fn test_config_validation() {
        let config = TokenizerConfig {
            chunk_size: 2,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TokenizerError::InvalidConfig(_))
        ));
        assert!(TokenizerConfig::default().validate().is_ok());
        assert!(TokenizerConfig::default().validate_paths().is_err());
        assert!(matches!(
            Tokenizer::new(TokenizerConfig::default()),
            Err(TokenizerError::InvalidConfig(_))
        ));

        let config = TokenizerConfig {
            merges_path: Some("merges.txt".into()),
            ..Default::default()
        };
        assert!(config.validate_paths().is_ok());
    }
}
