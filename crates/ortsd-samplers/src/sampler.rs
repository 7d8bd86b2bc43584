//! The noise scheduler driven by the denoising loop
//!
//! A [`NoiseScheduler`] owns the variance schedule, the inference timeline,
//! the seeded noise stream and whatever history its kind needs. The lifecycle
//! is `new` -> `init(n)` -> `step` x `num_steps()` -> `uninit`, and `init` may
//! be called again at any point to start over.

use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use burn::tensor::Int;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::SchedulerError;
use crate::heun::{self, HeunCache};
use crate::history::HistoryBuffer;
use crate::noise;
use crate::scheduler::{
    InferenceTimeline, PredictionCoefficients, PredictionType, SchedulerConfig, VarianceSchedule,
};
use crate::{ddim, ddpm, euler, lcm, lms, unipc};

/// Available update rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    #[default]
    Euler,
    #[serde(rename = "euler_a")]
    EulerAncestral,
    Ddpm,
    Ddim,
    Heun,
    Lcm,
    Lms,
    #[serde(rename = "unipc")]
    UniPc,
}

impl SchedulerKind {
    pub const ALL: [SchedulerKind; 8] = [
        SchedulerKind::Euler,
        SchedulerKind::EulerAncestral,
        SchedulerKind::Ddpm,
        SchedulerKind::Ddim,
        SchedulerKind::Heun,
        SchedulerKind::Lcm,
        SchedulerKind::Lms,
        SchedulerKind::UniPc,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SchedulerKind::Euler => "euler",
            SchedulerKind::EulerAncestral => "euler_a",
            SchedulerKind::Ddpm => "ddpm",
            SchedulerKind::Ddim => "ddim",
            SchedulerKind::Heun => "heun",
            SchedulerKind::Lcm => "lcm",
            SchedulerKind::Lms => "lms",
            SchedulerKind::UniPc => "unipc",
        }
    }

    /// Whether the update rule draws from the noise stream
    pub fn is_stochastic(self) -> bool {
        matches!(
            self,
            SchedulerKind::EulerAncestral
                | SchedulerKind::Ddpm
                | SchedulerKind::Ddim
                | SchedulerKind::Lcm
        )
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchedulerKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SchedulerKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| SchedulerError::UnknownKind(s.to_string()))
    }
}

/// Per-kind state carried between steps
enum MethodState<B: Backend> {
    Stateless,
    Heun(HistoryBuffer<HeunCache<B>>),
    Lms(HistoryBuffer<Tensor<B, 4>>),
}

impl<B: Backend> MethodState<B> {
    fn for_kind(kind: SchedulerKind, history_depth: usize) -> Self {
        match kind {
            SchedulerKind::Heun => MethodState::Heun(heun::new_cache()),
            SchedulerKind::Lms => MethodState::Lms(HistoryBuffer::new(history_depth)),
            _ => MethodState::Stateless,
        }
    }

    fn clear(&mut self) {
        match self {
            MethodState::Stateless => {}
            MethodState::Heun(cache) => cache.clear(),
            MethodState::Lms(history) => history.clear(),
        }
    }
}

/// Diffusion noise scheduler
pub struct NoiseScheduler<B: Backend> {
    kind: SchedulerKind,
    config: SchedulerConfig,
    schedule: VarianceSchedule,
    timeline: Option<InferenceTimeline>,
    method: MethodState<B>,
    rng: StdRng,
    seed: u64,
}

impl<B: Backend> NoiseScheduler<B> {
    /// Validate the config, build the variance schedule and seed the noise stream
    pub fn new(kind: SchedulerKind, config: SchedulerConfig) -> Result<Self, SchedulerError> {
        if kind == SchedulerKind::UniPc {
            return Err(unipc::unsupported());
        }
        if config.prediction_kind == PredictionType::Sample {
            error!(prediction = ?config.prediction_kind, "unsupported prediction kind");
            return Err(SchedulerError::UnsupportedPrediction(config.prediction_kind));
        }
        if kind == SchedulerKind::Lms && config.history_depth == 0 {
            error!(%kind, "history depth must be greater than zero");
            return Err(SchedulerError::ZeroHistoryDepth);
        }

        let schedule = VarianceSchedule::from_config(&config)?;

        let seed = if config.seed < 0 {
            let seed = rand::random::<u64>();
            info!(seed, "drew scheduler seed from entropy");
            seed
        } else {
            config.seed as u64
        };

        info!(
            %kind,
            training_steps = config.training_steps,
            beta_kind = ?config.beta_kind,
            prediction = ?config.prediction_kind,
            "built noise scheduler"
        );

        Ok(Self {
            kind,
            method: MethodState::for_kind(kind, config.history_depth),
            config,
            schedule,
            timeline: None,
            rng: StdRng::seed_from_u64(seed),
            seed,
        })
    }

    /// Build the inference timeline, returning the number of steps to run
    pub fn init(&mut self, inference_steps: usize) -> Result<usize, SchedulerError> {
        if inference_steps == 0 {
            error!(kind = %self.kind, "inference steps must be greater than zero");
            return Err(SchedulerError::ZeroInferenceSteps);
        }

        let mut timeline = InferenceTimeline::linspace(&self.schedule, inference_steps);
        if self.kind == SchedulerKind::Heun {
            timeline = timeline.interleaved();
        }
        self.method.clear();

        let steps = timeline.len();
        info!(
            kind = %self.kind,
            inference_steps,
            steps,
            max_sigma = timeline.max_sigma(),
            "initialized timeline"
        );
        self.timeline = Some(timeline);
        Ok(steps)
    }

    /// Drop the timeline and any history
    pub fn uninit(&mut self) {
        self.timeline = None;
        self.method.clear();
    }

    pub fn is_initialized(&self) -> bool {
        self.timeline.is_some()
    }

    fn timeline(&self) -> Result<&InferenceTimeline, SchedulerError> {
        self.timeline.as_ref().ok_or(SchedulerError::NotInitialized)
    }

    fn check_index(&self, index: usize) -> Result<&InferenceTimeline, SchedulerError> {
        let timeline = self.timeline()?;
        if index >= timeline.len() {
            return Err(SchedulerError::StepOutOfRange {
                index,
                len: timeline.len(),
            });
        }
        Ok(timeline)
    }

    /// Initial noise scaled to the largest sigma of the timeline
    pub fn mask(&mut self, shape: [usize; 4], device: &B::Device) -> Result<Tensor<B, 4>, SchedulerError> {
        let max_sigma = self.timeline()?.max_sigma();
        Ok(noise::gaussian(&mut self.rng, shape, device) * max_sigma)
    }

    /// Scale the latent to the network's input range for step `index`
    pub fn scale(&self, latent: Tensor<B, 4>, index: usize) -> Result<Tensor<B, 4>, SchedulerError> {
        let sigma = self.check_index(index)?.sigmas()[index];
        Ok(latent / (sigma * sigma + 1.0).sqrt())
    }

    /// Integer timestep for step `index`, truncated toward zero
    pub fn timestep(&self, index: usize) -> Result<i64, SchedulerError> {
        Ok(self.check_index(index)?.timesteps()[index] as i64)
    }

    /// Timestep tensor fed to the UNet
    pub fn time(&self, index: usize, device: &B::Device) -> Result<Tensor<B, 1, Int>, SchedulerError> {
        let t = self.timestep(index)?;
        Ok(Tensor::from_data(TensorData::new(vec![t], [1]), device))
    }

    /// Advance the latent by one step
    ///
    /// `random_intensity` is the DDIM eta and is ignored by other kinds.
    pub fn step(
        &mut self,
        sample: Tensor<B, 4>,
        model_output: Tensor<B, 4>,
        index: usize,
        random_intensity: f32,
    ) -> Result<Tensor<B, 4>, SchedulerError> {
        let timeline = self
            .timeline
            .as_ref()
            .ok_or(SchedulerError::NotInitialized)?;
        if index >= timeline.len() {
            return Err(SchedulerError::StepOutOfRange {
                index,
                len: timeline.len(),
            });
        }
        let sigmas = timeline.sigmas();
        let sigma = sigmas[index];
        let sigma_next = sigmas[index + 1];

        let coeffs = PredictionCoefficients::at(sigma, self.config.prediction_kind)?;
        let predict = coeffs.denoise(sample.clone(), model_output);
        debug!(kind = %self.kind, index, sigma, sigma_next, "scheduler step");

        let out = match (self.kind, &mut self.method) {
            (SchedulerKind::Euler, _) => euler::step(sample, predict, sigma, sigma_next),
            (SchedulerKind::EulerAncestral, _) => {
                euler::ancestral_step(sample, predict, sigma, sigma_next, &mut self.rng)
            }
            (SchedulerKind::Ddpm, _) => {
                ddpm::step(sample, predict, sigma, sigma_next, &mut self.rng)
            }
            (SchedulerKind::Ddim, _) => ddim::step(
                sample,
                predict,
                sigma,
                sigma_next,
                random_intensity,
                &mut self.rng,
            ),
            (SchedulerKind::Heun, MethodState::Heun(cache)) => {
                heun::step(cache, sample, predict, index, sigmas)?
            }
            (SchedulerKind::Lcm, _) => lcm::step(predict, sigma_next, &mut self.rng),
            (SchedulerKind::Lms, MethodState::Lms(history)) => {
                lms::step(history, sample, predict, index, sigmas)
            }
            (kind, _) => return Err(SchedulerError::Unimplemented(kind)),
        };

        Ok(out)
    }

    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Seed the noise stream was started from
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn schedule(&self) -> &VarianceSchedule {
        &self.schedule
    }

    /// Timesteps of the current timeline, empty before `init`
    pub fn timesteps(&self) -> &[f32] {
        self.timeline.as_ref().map(|t| t.timesteps()).unwrap_or_default()
    }

    /// Sigmas of the current timeline including the terminal 0
    pub fn sigmas(&self) -> &[f32] {
        self.timeline.as_ref().map(|t| t.sigmas()).unwrap_or_default()
    }

    pub fn max_sigma(&self) -> Option<f32> {
        self.timeline.as_ref().map(|t| t.max_sigma())
    }

    /// Number of `step` calls the caller has to make
    pub fn num_steps(&self) -> usize {
        self.timeline.as_ref().map_or(0, |t| t.len())
    }
}
