//! Prompt processing for CLIP text encoders
//!
//! This crate turns prompts written with attention syntax into the token
//! chunks a CLIP text encoder consumes, and assembles the encoder output into
//! conditioning embeddings.
//!
//! # Tokenizer
//!
//! The [`Tokenizer`] parses weights, encodes pieces and splits the result into
//! fixed-size [`TokenChunk`]s:
//!
//! ```ignore
//! use ortsd_clip::{Tokenizer, TokenizerConfig};
//!
//! let config = TokenizerConfig {
//!     merges_path: Some("bpe_merges.txt".into()),
//!     ..Default::default()
//! };
//! let tokenizer = Tokenizer::new(config)?;
//! let chunks = tokenizer.tokenize("a (red:1.3) fox, [blurry]");
//! ```

pub mod embedding;
pub mod prompt;
pub mod tokenizer;
pub mod vocab;

pub use embedding::{apply_weights, concat_chunks, embedding, pad_to_chunks};
pub use prompt::{PromptAttentionParser, PromptWeights, BREAK_TEXT, BREAK_WEIGHT};
pub use tokenizer::{TokenChunk, Tokenizer, TokenizerConfig, TokenizerError, TokenizerKind};
pub use vocab::{MergeRanks, Vocabulary, END_TOKEN, START_TOKEN};
