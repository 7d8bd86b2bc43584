//! Noise schedulers for Stable Diffusion sampling
//!
//! The variance schedule and timeline live in [`scheduler`], the stateful
//! [`NoiseScheduler`] in [`sampler`], and each update rule in its own module.

pub mod error;
pub mod history;
pub mod noise;
pub mod sampler;
pub mod scheduler;

pub mod ddim;
pub mod ddpm;
pub mod euler;
pub mod heun;
pub mod lcm;
pub mod lms;
pub mod unipc;

pub use error::SchedulerError;
pub use euler::get_ancestral_step;
pub use history::HistoryBuffer;
pub use sampler::{NoiseScheduler, SchedulerKind};
pub use scheduler::{
    AlphaTransform, BetaSchedule, InferenceTimeline, PredictionCoefficients, PredictionType,
    SchedulerConfig, VarianceSchedule,
};
