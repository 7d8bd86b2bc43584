//! DDIM (Denoising Diffusion Implicit Models) update rule
//!
//! `eta` interpolates between the deterministic sampler (0) and DDPM (1).
//! Same scaling convention as [`crate::ddpm`].

use burn::prelude::*;
use rand::rngs::StdRng;

use crate::noise::gaussian_like;

/// Factors `(a, b, v)` for one transition with stochasticity `eta`
pub fn coefficients(sigma: f32, sigma_next: f32, eta: f32) -> (f32, f32, f32) {
    let sigma_sq = sigma * sigma;
    let next_sq = sigma_next * sigma_next;

    let deviation =
        eta * (next_sq * (sigma_sq - next_sq) / (sigma_sq * (next_sq + 1.0))).sqrt();
    let ratio = sigma_next / sigma_sq * ((1.0 - eta) * sigma_sq + eta * next_sq).sqrt();
    let factor_a = ratio * (sigma_sq + 1.0).sqrt() / (next_sq + 1.0).sqrt();
    let factor_b = (1.0 - ratio) / (next_sq + 1.0).sqrt();

    (factor_a, factor_b, deviation)
}

/// One DDIM step on the unscaled latent
pub fn step<B: Backend>(
    sample: Tensor<B, 4>,
    predict: Tensor<B, 4>,
    sigma: f32,
    sigma_next: f32,
    eta: f32,
    rng: &mut StdRng,
) -> Tensor<B, 4> {
    let (factor_a, factor_b, deviation) = coefficients(sigma, sigma_next, eta);
    let scaled = sample / (sigma * sigma + 1.0).sqrt();

    let mut out = scaled * factor_a + predict * factor_b;
    if eta > 0.0 && sigma_next > 0.0 {
        let noise = gaussian_like(rng, &out);
        out = out + noise * deviation;
    }

    out * (sigma_next * sigma_next + 1.0).sqrt()
}
