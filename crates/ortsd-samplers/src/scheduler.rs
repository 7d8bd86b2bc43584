//! Noise schedules for diffusion models
//!
//! This module provides the variance schedule, the inference timeline and the
//! prediction coefficients shared across all scheduler variants.

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::SchedulerError;

// ============================================================================
// Schedule Kinds
// ============================================================================

/// Beta curve used to build the training noise schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaSchedule {
    /// Betas linearly spaced between `beta_start` and `beta_end`
    Linear,
    /// Linear in sqrt(beta) space (SD 1.x / 2.x)
    #[default]
    ScaledLinear,
    /// Betas derived from an alpha-bar kernel, capped at 0.999
    SquaredCosV2,
}

/// Alpha-bar kernel used by [`BetaSchedule::SquaredCosV2`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlphaTransform {
    /// ᾱ(t) = cos²((t + 0.008) / 1.008 · π/2)
    #[default]
    Cosine,
    /// ᾱ(t) = exp(-12 t)
    Exp,
}

impl AlphaTransform {
    fn alpha_bar(self, t: f64) -> f64 {
        match self {
            AlphaTransform::Cosine => ((t + 0.008) / 1.008 * std::f64::consts::FRAC_PI_2)
                .cos()
                .powi(2),
            AlphaTransform::Exp => (t * -12.0).exp(),
        }
    }
}

// ============================================================================
// Prediction Type (epsilon vs v-prediction)
// ============================================================================

/// Model prediction type
///
/// Different diffusion models are trained to predict different quantities:
/// - Epsilon (noise): SD 1.x, SDXL
/// - V-prediction (velocity): SD 2.x
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionType {
    /// Model predicts the noise (epsilon) added to the sample
    #[default]
    Epsilon,
    /// Model predicts the velocity v = alpha_t * epsilon - sigma_t * x0
    VPrediction,
    /// Model predicts the original sample x0 (not supported)
    Sample,
}

/// Coefficients turning raw network output into a denoised estimate
///
/// `predict = sample * c_skip + model_output * c_out`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionCoefficients {
    pub c_skip: f32,
    pub c_out: f32,
}

impl PredictionCoefficients {
    /// Coefficients for the given sigma and prediction type
    pub fn at(sigma: f32, prediction: PredictionType) -> Result<Self, SchedulerError> {
        match prediction {
            PredictionType::Epsilon => Ok(Self {
                c_skip: 1.0,
                c_out: -sigma,
            }),
            PredictionType::VPrediction => {
                let sigma_sq = sigma * sigma + 1.0;
                Ok(Self {
                    c_skip: 1.0 / sigma_sq,
                    c_out: -sigma / sigma_sq.sqrt(),
                })
            }
            PredictionType::Sample => Err(SchedulerError::UnsupportedPrediction(prediction)),
        }
    }

    /// Denoised estimate of x0
    pub fn denoise<B: Backend>(
        &self,
        sample: Tensor<B, 4>,
        model_output: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        sample * self.c_skip + model_output * self.c_out
    }
}

// ============================================================================
// Schedule Configuration
// ============================================================================

/// Scheduler options record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of training timesteps
    pub training_steps: usize,
    /// First beta of the training schedule
    pub beta_start: f64,
    /// Last beta of the training schedule
    pub beta_end: f64,
    /// Beta curve
    pub beta_kind: BetaSchedule,
    /// Alpha-bar kernel (only used by squared_cos_v2)
    pub alpha_kind: AlphaTransform,
    /// Network output parameterization
    pub prediction_kind: PredictionType,
    /// Seed for the scheduler noise stream, negative draws one from entropy
    pub seed: i64,
    /// History length for multistep variants (LMS order)
    pub history_depth: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            training_steps: 1000,
            beta_start: 0.00085,
            beta_end: 0.012,
            beta_kind: BetaSchedule::ScaledLinear,
            alpha_kind: AlphaTransform::Cosine,
            prediction_kind: PredictionType::Epsilon,
            seed: -1,
            history_depth: 4,
        }
    }
}

// ============================================================================
// Variance Schedule
// ============================================================================

/// Precomputed cumulative alpha products for every training timestep
#[derive(Debug, Clone)]
pub struct VarianceSchedule {
    /// Cumulative product of alphas: ᾱₜ
    alphas_cumprod: Vec<f32>,
    /// sqrt((1 - ᾱₜ) / ᾱₜ) for every training timestep
    sigmas: Vec<f32>,
}

impl VarianceSchedule {
    /// Build the schedule from beta hyperparameters
    pub fn new(
        training_steps: usize,
        beta_start: f64,
        beta_end: f64,
        beta_schedule: BetaSchedule,
        alpha_transform: AlphaTransform,
    ) -> Result<Self, SchedulerError> {
        if training_steps < 2 {
            error!(training_steps, "variance schedule needs at least two training steps");
            return Err(SchedulerError::InvalidTrainingSteps(training_steps));
        }

        let last = (training_steps - 1) as f64;
        let betas: Vec<f64> = match beta_schedule {
            BetaSchedule::Linear => (0..training_steps)
                .map(|i| beta_start + (beta_end - beta_start) * (i as f64 / last))
                .collect(),
            BetaSchedule::ScaledLinear => {
                let (start, end) = (beta_start.sqrt(), beta_end.sqrt());
                (0..training_steps)
                    .map(|i| (start + (end - start) * (i as f64 / last)).powi(2))
                    .collect()
            }
            BetaSchedule::SquaredCosV2 => {
                let n = training_steps as f64;
                (0..training_steps)
                    .map(|i| {
                        let t1 = i as f64 / n;
                        let t2 = (i + 1) as f64 / n;
                        let ratio = alpha_transform.alpha_bar(t2) / alpha_transform.alpha_bar(t1);
                        (1.0 - ratio).min(0.999)
                    })
                    .collect()
            }
        };

        // Cumulative product
        let mut alphas_cumprod = Vec::with_capacity(training_steps);
        let mut cumprod = 1.0f64;
        for beta in betas {
            cumprod *= 1.0 - beta;
            alphas_cumprod.push(cumprod);
        }

        let sigmas = alphas_cumprod
            .iter()
            .map(|&alpha| ((1.0 - alpha) / alpha).sqrt() as f32)
            .collect();

        Ok(Self {
            alphas_cumprod: alphas_cumprod.into_iter().map(|a| a as f32).collect(),
            sigmas,
        })
    }

    /// Build the schedule described by a scheduler config
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::new(
            config.training_steps,
            config.beta_start,
            config.beta_end,
            config.beta_kind,
            config.alpha_kind,
        )
    }

    /// Create the default SD 1.x schedule
    pub fn sd1x() -> Result<Self, SchedulerError> {
        Self::new(
            1000,
            0.00085,
            0.012,
            BetaSchedule::ScaledLinear,
            AlphaTransform::Cosine,
        )
    }

    /// Number of training steps
    pub fn num_train_steps(&self) -> usize {
        self.alphas_cumprod.len()
    }

    /// The raw ᾱ sequence
    pub fn alphas_cumprod(&self) -> &[f32] {
        &self.alphas_cumprod
    }

    /// Get alpha_cumprod at a specific timestep
    pub fn alpha_cumprod_at(&self, t: usize) -> f32 {
        self.alphas_cumprod[t]
    }

    /// Sigma at an integer training timestep
    pub fn sigma_at(&self, t: usize) -> f32 {
        self.sigmas[t]
    }

    /// Sigma at a fractional timestep, linearly interpolated
    pub fn sigma_interpolated(&self, timestep: f32) -> f32 {
        let last = self.sigmas.len() - 1;
        let timestep = timestep.clamp(0.0, last as f32);
        let low = timestep.floor() as usize;
        let high = timestep.ceil() as usize;
        let w = timestep - low as f32;
        (1.0 - w) * self.sigmas[low] + w * self.sigmas[high]
    }
}

// ============================================================================
// Inference Timeline
// ============================================================================

/// Timesteps and sigmas the sampling loop walks through
///
/// `sigmas` always holds one more entry than `timesteps`: the terminal 0.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceTimeline {
    timesteps: Vec<f32>,
    sigmas: Vec<f32>,
    max_sigma: f32,
}

impl InferenceTimeline {
    /// Evenly sub-sample the training range, highest noise first
    pub fn linspace(schedule: &VarianceSchedule, inference_steps: usize) -> Self {
        let end = (schedule.num_train_steps() - 1) as f32;
        let gap = if inference_steps > 1 {
            end / (inference_steps - 1) as f32
        } else {
            end
        };

        let mut timesteps = Vec::with_capacity(inference_steps);
        let mut sigmas = Vec::with_capacity(inference_steps + 1);
        let mut max_sigma = 0.0f32;
        for i in 0..inference_steps {
            let t = end - gap * i as f32;
            let sigma = schedule.sigma_interpolated(t);
            max_sigma = max_sigma.max(sigma);
            timesteps.push(t);
            sigmas.push(sigma);
        }
        sigmas.push(0.0);

        Self {
            timesteps,
            sigmas,
            max_sigma,
        }
    }

    /// Duplicate every entry after the first for predictor/corrector pairs
    ///
    /// `[t0, t1, t2]` becomes `[t0, t1, t1, t2, t2]` with sigmas
    /// `[s0, s1, s1, s2, s2, 0]`.
    pub fn interleaved(self) -> Self {
        let mut timesteps = Vec::with_capacity(self.timesteps.len() * 2);
        let mut sigmas = Vec::with_capacity(self.sigmas.len() * 2);
        for (i, (&t, &sigma)) in self.timesteps.iter().zip(&self.sigmas).enumerate() {
            timesteps.push(t);
            sigmas.push(sigma);
            if i > 0 {
                timesteps.push(t);
                sigmas.push(sigma);
            }
        }
        sigmas.push(0.0);

        Self {
            timesteps,
            sigmas,
            max_sigma: self.max_sigma,
        }
    }

    /// Number of steps the caller has to run
    pub fn len(&self) -> usize {
        self.timesteps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timesteps.is_empty()
    }

    pub fn timesteps(&self) -> &[f32] {
        &self.timesteps
    }

    /// Sigmas including the terminal 0
    pub fn sigmas(&self) -> &[f32] {
        &self.sigmas
    }

    pub fn max_sigma(&self) -> f32 {
        self.max_sigma
    }
}
