//! Denoising loop
//!
//! Drives the UNet and a [`NoiseScheduler`] over the inference timeline,
//! with optional classifier-free guidance.

use burn::prelude::*;
use ortsd_samplers::NoiseScheduler;
use tracing::{debug, info};

use crate::engine::InferenceEngine;
use crate::error::{Error, Result};
use crate::models::Unet;

/// Apply classifier-free guidance
///
/// `uncond + scale * (cond - uncond)`
pub fn apply_guidance<B: Backend>(
    noise_pred_uncond: Tensor<B, 4>,
    noise_pred_cond: Tensor<B, 4>,
    guidance_scale: f32,
) -> Tensor<B, 4> {
    noise_pred_uncond.clone() + (noise_pred_cond - noise_pred_uncond) * guidance_scale
}

/// Prompt embeddings for one request
///
/// Holds `[1, L, D]` for a positive-only request, or `[2, L, D]` with the
/// positive branch first when guidance is enabled.
#[derive(Debug, Clone)]
pub struct Conditioning<B: Backend> {
    embedding: Tensor<B, 3>,
}

impl<B: Backend> Conditioning<B> {
    pub fn new(embedding: Tensor<B, 3>) -> Result<Self> {
        let [batch, tokens, dim] = embedding.dims();
        if !matches!(batch, 1 | 2) || tokens == 0 || dim == 0 {
            return Err(Error::Shape(format!(
                "conditioning must be [1 or 2, L, D], got {:?}",
                embedding.dims()
            )));
        }
        Ok(Self { embedding })
    }

    /// Whether a negative branch is present
    pub fn guided(&self) -> bool {
        self.embedding.dims()[0] == 2
    }

    pub fn embedding(&self) -> &Tensor<B, 3> {
        &self.embedding
    }

    pub fn positive(&self) -> Tensor<B, 3> {
        self.embedding.clone().narrow(0, 0, 1)
    }

    pub fn negative(&self) -> Option<Tensor<B, 3>> {
        self.guided().then(|| self.embedding.clone().narrow(0, 1, 1))
    }
}

/// Sampling parameters that stay fixed across steps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DenoisingLoop {
    pub guidance_scale: f32,
    /// DDIM eta
    pub random_intensity: f32,
}

impl DenoisingLoop {
    /// Denoise from `init_latent` (or pure noise) to a clean latent
    ///
    /// The scheduler must already be initialized; every step of its timeline
    /// is run, including the corrector steps of two-stage methods.
    pub fn run<B: Backend, E: InferenceEngine>(
        &self,
        engine: &E,
        unet: &Unet,
        scheduler: &mut NoiseScheduler<B>,
        conditioning: &Conditioning<B>,
        init_latent: Option<Tensor<B, 4>>,
        latent_shape: [usize; 4],
    ) -> Result<Tensor<B, 4>> {
        let device = &conditioning.embedding().device();
        let steps = scheduler.num_steps();
        if steps == 0 {
            return Err(ortsd_samplers::SchedulerError::NotInitialized.into());
        }

        let base = match init_latent {
            Some(latent) => {
                if latent.dims() != latent_shape {
                    return Err(Error::Shape(format!(
                        "initial latent {:?} does not match {latent_shape:?}",
                        latent.dims()
                    )));
                }
                latent
            }
            None => Tensor::zeros(latent_shape, device),
        };
        let mut latent = base + scheduler.mask(latent_shape, device)?;

        let positive = conditioning.positive();
        let negative = conditioning.negative();
        info!(
            steps,
            guided = negative.is_some(),
            kind = %scheduler.kind(),
            "denoising"
        );

        for step_idx in 0..steps {
            let input = scheduler.scale(latent.clone(), step_idx)?;
            let t = scheduler.time(step_idx, device)?;

            let noise_cond = unet.predict(engine, input.clone(), t.clone(), positive.clone())?;
            let noise_pred = match &negative {
                Some(negative) => {
                    let noise_uncond = unet.predict(engine, input, t, negative.clone())?;
                    apply_guidance(noise_uncond, noise_cond, self.guidance_scale)
                }
                None => noise_cond,
            };

            latent = scheduler.step(latent, noise_pred, step_idx, self.random_intensity)?;
            debug!(step = step_idx, total = steps, "denoising step done");
        }

        Ok(latent)
    }
}
