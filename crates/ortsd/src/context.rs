//! Request context
//!
//! A [`Context`] owns the model wrappers, the tokenizer and the scheduler for
//! one configuration. Conditioning set by [`Context::prepare`] is used by
//! every following [`Context::inference`] until it is replaced or released.

use std::sync::{Mutex, MutexGuard};

use burn::prelude::*;
use ortsd_clip::{embedding, pad_to_chunks, Tokenizer};
use ortsd_samplers::NoiseScheduler;
use tracing::info;

use crate::config::ContextConfig;
use crate::engine::{InferenceEngine, ModelRole};
use crate::error::{Error, Result};
use crate::models::{TextEncoder, Unet, Vae};
use crate::pipeline::{Conditioning, DenoisingLoop};

/// Mutable per-request state, guarded by the context lock
struct Session<B: Backend> {
    scheduler: NoiseScheduler<B>,
    tokenizer: Tokenizer,
    conditioning: Option<Conditioning<B>>,
}

pub struct Context<B: Backend, E> {
    config: ContextConfig,
    engine: E,
    text_encoder: TextEncoder,
    unet: Unet,
    vae: Vae,
    device: B::Device,
    session: Mutex<Session<B>>,
}

impl<B: Backend, E: InferenceEngine> Context<B, E> {
    /// Validate `config` and load the tokenizer files it names
    pub fn new(config: ContextConfig, engine: E, device: &B::Device) -> Result<Self> {
        config.validate()?;
        let tokenizer = Tokenizer::new(config.tokenizer.clone())?;
        Self::from_parts(config, engine, tokenizer, device)
    }

    /// Build with an already constructed tokenizer
    pub fn from_parts(
        config: ContextConfig,
        engine: E,
        tokenizer: Tokenizer,
        device: &B::Device,
    ) -> Result<Self> {
        config.validate()?;
        let scheduler = NoiseScheduler::new(config.scheduler_kind, config.scheduler.clone())?;

        let names = &config.io_names;
        let text_encoder = TextEncoder::new(
            config.models.handle(ModelRole::TextEncoder),
            names.text_encoder.clone(),
        );
        let unet = Unet::new(config.models.handle(ModelRole::Unet), names.unet.clone());
        let vae = Vae::new(
            config.models.handle(ModelRole::VaeEncoder),
            config.models.handle(ModelRole::VaeDecoder),
            names.vae_encoder.clone(),
            names.vae_decoder.clone(),
            config.vae_scale_factor,
        );

        info!(
            scheduler = %config.scheduler_kind,
            seed = scheduler.seed(),
            steps = config.inference_steps,
            guided = config.guided(),
            "created context"
        );

        Ok(Self {
            config,
            engine,
            text_encoder,
            unet,
            vae,
            device: device.clone(),
            session: Mutex::new(Session {
                scheduler,
                tokenizer,
                conditioning: None,
            }),
        })
    }

    /// Encode the prompts and store the conditioning for later requests
    ///
    /// The negative prompt is only encoded when guidance is enabled; an empty
    /// negative prompt becomes the unconditional chunk.
    pub fn prepare(&self, positive: &str, negative: &str) -> Result<()> {
        let mut session = self.session()?;
        info!(guided = self.config.guided(), "preparing conditioning");

        let tokenizer = &session.tokenizer;
        let encoder = &self.text_encoder;
        let positive =
            encoder.encode::<B, _>(&self.engine, tokenizer, positive, &self.device)?;

        let joint = if self.config.guided() {
            let unconditional = encoder.encode_chunk::<B, _>(
                &self.engine,
                &tokenizer.unconditional_chunk(),
                tokenizer.hidden_dim(),
                &self.device,
            )?;
            let negative = if negative.trim().is_empty() {
                unconditional.clone()
            } else {
                encoder.encode::<B, _>(&self.engine, tokenizer, negative, &self.device)?
            };

            let tokens = positive.dims()[1].max(negative.dims()[1]);
            let positive = pad_to_chunks(positive, unconditional.clone(), tokens)?;
            let negative = pad_to_chunks(negative, unconditional, tokens)?;
            embedding(positive, Some(negative))?
        } else {
            embedding(positive, None)?
        };

        let conditioning = Conditioning::new(joint)?;
        info!(shape = ?conditioning.embedding().dims(), "conditioning ready");
        session.conditioning = Some(conditioning);
        Ok(())
    }

    /// Run the denoising loop and decode the result to `[1, 3, H, W]` in [0, 1]
    ///
    /// With an `init_image` in [0, 1] the loop starts from its encoded latent
    /// instead of zeros.
    pub fn inference(&self, init_image: Option<Tensor<B, 4>>) -> Result<Tensor<B, 4>> {
        let mut guard = self.session()?;
        let session = &mut *guard;
        let conditioning = session.conditioning.as_ref().ok_or(Error::NotPrepared)?;

        let init_latent = init_image
            .map(|image| self.vae.encode(&self.engine, image))
            .transpose()?;

        session.scheduler.init(self.config.inference_steps)?;
        let denoiser = DenoisingLoop {
            guidance_scale: self.config.guidance_scale,
            random_intensity: self.config.random_intensity,
        };
        let latent = denoiser.run(
            &self.engine,
            &self.unet,
            &mut session.scheduler,
            conditioning,
            init_latent,
            self.config.latent_shape(),
        )?;

        let image = self.vae.decode(&self.engine, latent)?;
        info!(shape = ?image.dims(), "inference finished");
        Ok(image)
    }

    /// Drop the conditioning and the scheduler timeline
    pub fn release(&self) -> Result<()> {
        let mut session = self.session()?;
        session.scheduler.uninit();
        session.conditioning = None;
        info!("released context");
        Ok(())
    }

    pub fn is_prepared(&self) -> Result<bool> {
        Ok(self.session()?.conditioning.is_some())
    }

    /// Chunk `prompt` and decode each chunk back to text
    pub fn untokenize(&self, prompt: &str) -> Result<Vec<String>> {
        let session = self.session()?;
        let tokenizer = &session.tokenizer;
        Ok(tokenizer
            .tokenize(prompt)
            .iter()
            .map(|chunk| tokenizer.untokenize(chunk))
            .collect())
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    fn session(&self) -> Result<MutexGuard<'_, Session<B>>> {
        self.session.lock().map_err(|_| Error::Poisoned)
    }
}
