//! Prompt attention syntax
//!
//! Parses the weighting syntax used by SD front ends into (text, weight) runs:
//!
//! - `(text)` multiplies the weight by the increase factor (1.1)
//! - `[text]` multiplies the weight by the decrease factor (1/1.1)
//! - `(text:1.5)` sets an explicit multiplier
//! - `\(` `\)` `\[` `\]` `\\` are literal characters
//! - `BREAK` forces a new token chunk and is emitted as `("BREAK", -1.0)`

use regex::Regex;

use crate::tokenizer::TokenizerError;

/// Text emitted for a chunk break
pub const BREAK_TEXT: &str = "BREAK";

/// Weight emitted for a chunk break
pub const BREAK_WEIGHT: f32 = -1.0;

const ATTENTION_PATTERN: &str =
    r"\\\(|\\\)|\\\[|\\\]|\\\\|\\|\(|\[|:\s*([+-]?[.\d]+)\s*\)|\)|\]|[^\\()\[\]:]+|:";

const BREAK_PATTERN: &str = r"\s*\bBREAK\b\s*";

/// Ordered (text, weight) runs of a prompt
pub type PromptWeights = Vec<(String, f32)>;

#[derive(Debug, Clone)]
struct Fragment {
    text: String,
    weight: f32,
    is_break: bool,
}

impl Fragment {
    fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            weight: 1.0,
            is_break: false,
        }
    }

    fn chunk_break() -> Self {
        Self {
            text: BREAK_TEXT.to_string(),
            weight: BREAK_WEIGHT,
            is_break: true,
        }
    }
}

/// Parser for the prompt attention syntax
#[derive(Debug, Clone)]
pub struct PromptAttentionParser {
    increase_factor: f32,
    decrease_factor: f32,
    attention: Regex,
    breaks: Regex,
}

impl PromptAttentionParser {
    pub fn new(increase_factor: f32, decrease_factor: f32) -> Result<Self, TokenizerError> {
        Ok(Self {
            increase_factor,
            decrease_factor,
            attention: Regex::new(ATTENTION_PATTERN)?,
            breaks: Regex::new(BREAK_PATTERN)?,
        })
    }

    /// Parser with the usual 1.1 / (1/1.1) factors
    pub fn standard() -> Result<Self, TokenizerError> {
        Self::new(1.1, 1.0 / 1.1)
    }

    /// Split `text` into weighted runs, merging neighbours of equal weight
    ///
    /// ```ignore
    /// let runs = parser.parse("a (b) c");
    /// assert_eq!(runs, vec![("a ".into(), 1.0), ("b".into(), 1.1), (" c".into(), 1.0)]);
    /// ```
    pub fn parse(&self, text: &str) -> PromptWeights {
        let mut fragments: Vec<Fragment> = Vec::new();
        let mut round: Vec<usize> = Vec::new();
        let mut square: Vec<usize> = Vec::new();

        for caps in self.attention.captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let token = whole.as_str();
            let explicit = caps.get(1).and_then(|m| m.as_str().parse::<f32>().ok());

            if token.len() > 1 && token.starts_with('\\') {
                fragments.push(Fragment::text(&token[1..]));
            } else if token == "(" {
                round.push(fragments.len());
            } else if token == "[" {
                square.push(fragments.len());
            } else if let (Some(weight), Some(start)) = (explicit, round.last().copied()) {
                round.pop();
                multiply_range(&mut fragments, start, weight);
            } else if token == ")" && !round.is_empty() {
                if let Some(start) = round.pop() {
                    multiply_range(&mut fragments, start, self.increase_factor);
                }
            } else if token == "]" && !square.is_empty() {
                if let Some(start) = square.pop() {
                    multiply_range(&mut fragments, start, self.decrease_factor);
                }
            } else {
                for (i, part) in self.breaks.split(token).enumerate() {
                    if i > 0 {
                        fragments.push(Fragment::chunk_break());
                    }
                    fragments.push(Fragment::text(part));
                }
            }
        }

        // Unclosed scopes still apply to everything after them
        for start in round {
            multiply_range(&mut fragments, start, self.increase_factor);
        }
        for start in square {
            multiply_range(&mut fragments, start, self.decrease_factor);
        }

        if fragments.is_empty() {
            return vec![(String::new(), 1.0)];
        }

        merge_equal_weights(fragments)
            .into_iter()
            .map(|fragment| (fragment.text, fragment.weight))
            .collect()
    }
}

fn multiply_range(fragments: &mut [Fragment], start: usize, factor: f32) {
    for fragment in fragments.iter_mut().skip(start) {
        if !fragment.is_break {
            fragment.weight *= factor;
        }
    }
}

fn merge_equal_weights(fragments: Vec<Fragment>) -> Vec<Fragment> {
    let mut merged: Vec<Fragment> = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        match merged.last_mut() {
            Some(last)
                if !last.is_break && !fragment.is_break && last.weight == fragment.weight =>
            {
                last.text.push_str(&fragment.text);
            }
            _ => merged.push(fragment),
        }
    }
    merged
}
