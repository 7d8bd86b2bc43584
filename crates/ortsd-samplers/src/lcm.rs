//! LCM (Latent Consistency Model) update rule
//!
//! Consistency models map any noisy latent straight to x0, so each step takes
//! the prediction and re-noises it to the next sigma.

use burn::prelude::*;
use rand::rngs::StdRng;

use crate::noise::gaussian_like;

/// One LCM step
pub fn step<B: Backend>(predict: Tensor<B, 4>, sigma_next: f32, rng: &mut StdRng) -> Tensor<B, 4> {
    if sigma_next > 0.0 {
        let noise = gaussian_like(rng, &predict);
        predict + noise * sigma_next
    } else {
        predict
    }
}
