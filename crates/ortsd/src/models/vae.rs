//! VAE encoder and decoder wrapper
//!
//! Latents are kept multiplied by the VAE scale factor; images are in [0, 1].

use burn::prelude::*;

use crate::config::VaeIo;
use crate::engine::{take_output, InferenceEngine, ModelHandle};
use crate::error::Result;

/// VAE encoder/decoder pair run through the engine
#[derive(Debug, Clone)]
pub struct Vae {
    encoder: ModelHandle,
    decoder: ModelHandle,
    encoder_io: VaeIo,
    decoder_io: VaeIo,
    scale_factor: f32,
}

impl Vae {
    pub fn new(
        encoder: ModelHandle,
        decoder: ModelHandle,
        encoder_io: VaeIo,
        decoder_io: VaeIo,
        scale_factor: f32,
    ) -> Self {
        Self {
            encoder,
            decoder,
            encoder_io,
            decoder_io,
            scale_factor,
        }
    }

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    /// Encode an image in [0, 1] to a scaled latent
    pub fn encode<B: Backend, E: InferenceEngine>(
        &self,
        engine: &E,
        image: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>> {
        let device = image.device();
        let pixels = image * 2.0 - 1.0;

        let inputs = vec![(
            self.encoder_io.input.clone(),
            pixels.into_data().convert::<f32>(),
        )];
        let mut outputs = engine.run(&self.encoder, inputs)?;
        let latent: Tensor<B, 4> =
            take_output(&mut outputs, &self.encoder, &self.encoder_io.output, &device)?;

        Ok(latent * self.scale_factor)
    }

    /// Decode a scaled latent to an image in [0, 1]
    pub fn decode<B: Backend, E: InferenceEngine>(
        &self,
        engine: &E,
        latent: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>> {
        let device = latent.device();
        let latent = latent / self.scale_factor;

        let inputs = vec![(
            self.decoder_io.input.clone(),
            latent.into_data().convert::<f32>(),
        )];
        let mut outputs = engine.run(&self.decoder, inputs)?;
        let image: Tensor<B, 4> =
            take_output(&mut outputs, &self.decoder, &self.decoder_io.output, &device)?;

        Ok((image / 2.0 + 0.5).clamp(0.0, 1.0))
    }
}
