//! Prompt embedding assembly
//!
//! Text encoder output comes back one chunk at a time as `[1, chunk, dim]`.
//! These helpers apply the per-token prompt weights, join chunks along the
//! token axis and stack the positive and negative branches along the batch
//! axis (positive first).

use burn::prelude::*;

use crate::tokenizer::TokenizerError;

/// Scale each token's hidden state by its weight, keeping the overall mean
pub fn apply_weights<B: Backend>(
    hidden: Tensor<B, 3>,
    weights: &[f32],
) -> Result<Tensor<B, 3>, TokenizerError> {
    let [batch, tokens, _] = hidden.dims();
    if weights.len() != tokens {
        return Err(TokenizerError::Shape(format!(
            "{} weights for {} tokens",
            weights.len(),
            tokens
        )));
    }
    if weights.iter().all(|&w| w == 1.0) {
        return Ok(hidden);
    }

    let device = hidden.device();
    let weights: Tensor<B, 3> =
        Tensor::from_data(TensorData::new(weights.to_vec(), [1, tokens, 1]), &device);

    let original_mean: f32 = hidden.clone().mean().into_scalar().elem();
    let weighted = hidden * weights.repeat_dim(0, batch);
    let weighted_mean: f32 = weighted.clone().mean().into_scalar().elem();

    // Weights of mixed sign can cancel the mean out
    if weighted_mean.abs() < f32::EPSILON {
        return Ok(weighted);
    }
    Ok(weighted * (original_mean / weighted_mean))
}

/// Join per-chunk hidden states along the token axis
pub fn concat_chunks<B: Backend>(chunks: Vec<Tensor<B, 3>>) -> Result<Tensor<B, 3>, TokenizerError> {
    if chunks.is_empty() {
        return Err(TokenizerError::Shape("no chunks to concatenate".to_string()));
    }
    Ok(Tensor::cat(chunks, 1))
}

/// Extend `embedding` with copies of `unconditional` up to `target_tokens`
pub fn pad_to_chunks<B: Backend>(
    embedding: Tensor<B, 3>,
    unconditional: Tensor<B, 3>,
    target_tokens: usize,
) -> Result<Tensor<B, 3>, TokenizerError> {
    let [_, tokens, _] = embedding.dims();
    let [_, chunk, _] = unconditional.dims();
    if tokens >= target_tokens {
        return Ok(embedding);
    }
    if chunk == 0 || (target_tokens - tokens) % chunk != 0 {
        return Err(TokenizerError::Shape(format!(
            "cannot pad {tokens} tokens to {target_tokens} with chunks of {chunk}"
        )));
    }

    let missing = (target_tokens - tokens) / chunk;
    let mut parts = Vec::with_capacity(missing + 1);
    parts.push(embedding);
    parts.extend(std::iter::repeat(unconditional).take(missing));
    Ok(Tensor::cat(parts, 1))
}

/// Stack positive and negative embeddings along the batch axis
///
/// Without a negative branch the positive embedding is returned unchanged.
pub fn embedding<B: Backend>(
    positive: Tensor<B, 3>,
    negative: Option<Tensor<B, 3>>,
) -> Result<Tensor<B, 3>, TokenizerError> {
    let Some(negative) = negative else {
        return Ok(positive);
    };

    let [_, p_tokens, p_dim] = positive.dims();
    let [_, n_tokens, n_dim] = negative.dims();
    if p_tokens != n_tokens || p_dim != n_dim {
        return Err(TokenizerError::Shape(format!(
            "positive [{p_tokens}, {p_dim}] and negative [{n_tokens}, {n_dim}] differ"
        )));
    }
    Ok(Tensor::cat(vec![positive, negative], 0))
}
