//! Text encoder wrapper

use burn::prelude::*;
use ortsd_clip::{apply_weights, concat_chunks, TokenChunk, Tokenizer};
use tracing::debug;

use crate::config::TextEncoderIo;
use crate::engine::{take_output, InferenceEngine, ModelHandle};
use crate::error::{Error, Result};

/// CLIP text encoder run through the engine
#[derive(Debug, Clone)]
pub struct TextEncoder {
    handle: ModelHandle,
    io: TextEncoderIo,
}

impl TextEncoder {
    pub fn new(handle: ModelHandle, io: TextEncoderIo) -> Self {
        Self { handle, io }
    }

    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }

    /// Encode a weighted prompt into `[1, chunk_size * chunks, hidden_dim]`
    pub fn encode<B: Backend, E: InferenceEngine>(
        &self,
        engine: &E,
        tokenizer: &Tokenizer,
        prompt: &str,
        device: &B::Device,
    ) -> Result<Tensor<B, 3>> {
        let chunks = tokenizer.tokenize(prompt);
        debug!(chunks = chunks.len(), "encoding prompt");

        let hidden = chunks
            .iter()
            .map(|chunk| self.encode_chunk(engine, chunk, tokenizer.hidden_dim(), device))
            .collect::<Result<Vec<_>>>()?;

        Ok(concat_chunks(hidden)?)
    }

    /// Run one chunk through the encoder and apply its token weights
    pub fn encode_chunk<B: Backend, E: InferenceEngine>(
        &self,
        engine: &E,
        chunk: &TokenChunk,
        hidden_dim: usize,
        device: &B::Device,
    ) -> Result<Tensor<B, 3>> {
        let inputs = vec![(self.io.input_ids.clone(), chunk.ids_data())];
        let mut outputs = engine.run(&self.handle, inputs)?;
        let hidden: Tensor<B, 3> =
            take_output(&mut outputs, &self.handle, &self.io.last_hidden_state, device)?;

        let dims = hidden.dims();
        if dims != [1, chunk.len(), hidden_dim] {
            return Err(Error::Shape(format!(
                "text encoder returned {dims:?}, expected [1, {}, {hidden_dim}]",
                chunk.len()
            )));
        }

        Ok(apply_weights(hidden, &chunk.weights)?)
    }
}
