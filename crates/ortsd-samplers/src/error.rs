//! Scheduler errors

use thiserror::Error;

use crate::sampler::SchedulerKind;
use crate::scheduler::PredictionType;

/// Errors raised by schedule construction and sampling
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("training steps must be at least 2, got {0}")]
    InvalidTrainingSteps(usize),

    #[error("inference steps must be greater than zero")]
    ZeroInferenceSteps,

    #[error("history depth must be greater than zero")]
    ZeroHistoryDepth,

    #[error("unknown scheduler kind {0:?}")]
    UnknownKind(String),

    #[error("prediction type {0:?} is not supported")]
    UnsupportedPrediction(PredictionType),

    #[error("scheduler {0} is not implemented")]
    Unimplemented(SchedulerKind),

    #[error("scheduler is not initialized, call init() first")]
    NotInitialized,

    #[error("step index {index} out of range for a timeline of {len} steps")]
    StepOutOfRange { index: usize, len: usize },

    #[error("corrector step {0} called without a preceding predictor step")]
    MissingPredictor(usize),
}

impl SchedulerError {
    /// True for errors caused by a bad scheduler configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidTrainingSteps(_)
                | SchedulerError::ZeroInferenceSteps
                | SchedulerError::ZeroHistoryDepth
                | SchedulerError::UnknownKind(_)
                | SchedulerError::UnsupportedPrediction(_)
                | SchedulerError::Unimplemented(_)
        )
    }
}
