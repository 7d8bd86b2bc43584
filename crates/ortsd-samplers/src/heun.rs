//! Heun update rule
//!
//! Heun's method is a second-order Runge-Kutta method that provides
//! better accuracy than Euler at the cost of two function evaluations per step.
//!
//! The timeline is interleaved so every sigma after the first appears twice.
//! Even indices run the Euler predictor and cache its derivative; odd indices
//! average that derivative with the one at the predicted point.

use burn::prelude::*;

use crate::error::SchedulerError;
use crate::euler;
use crate::history::HistoryBuffer;

/// Predictor output kept for the matching corrector call
#[derive(Debug, Clone)]
pub struct HeunCache<B: Backend> {
    pub sample: Tensor<B, 4>,
    pub derivative: Tensor<B, 4>,
}

/// Cache holding at most one predictor result
pub fn new_cache<B: Backend>() -> HistoryBuffer<HeunCache<B>> {
    HistoryBuffer::new(1)
}

/// True when `step_index` is a predictor position in an interleaved timeline
pub fn is_predictor(step_index: usize) -> bool {
    step_index % 2 == 0
}

/// One Heun call at `step_index` of an interleaved timeline
pub fn step<B: Backend>(
    cache: &mut HistoryBuffer<HeunCache<B>>,
    sample: Tensor<B, 4>,
    predict: Tensor<B, 4>,
    step_index: usize,
    sigmas: &[f32],
) -> Result<Tensor<B, 4>, SchedulerError> {
    let sigma = sigmas[step_index];
    let sigma_next = sigmas[step_index + 1];

    if is_predictor(step_index) {
        let derivative = euler::derivative(sample.clone(), predict, sigma);
        let out = sample.clone() + derivative.clone() * (sigma_next - sigma);
        if sigma_next == 0.0 {
            cache.clear();
        } else {
            cache.push_front(HeunCache { sample, derivative });
        }
        return Ok(out);
    }

    let cached = cache
        .pop_front()
        .ok_or(SchedulerError::MissingPredictor(step_index))?;
    let sigma_prev = sigmas[step_index - 1];
    let derivative = euler::derivative(sample, predict, sigma);
    let dt = sigma - sigma_prev;

    Ok(cached.sample + (cached.derivative + derivative) * (dt / 2.0))
}
