//! DDPM (Denoising Diffusion Probabilistic Models) update rule
//!
//! Stepping happens on the network-scaled sample `x / sqrt(sigma^2 + 1)` and
//! the result is scaled back up for the next sigma.

use burn::prelude::*;
use rand::rngs::StdRng;

use crate::noise::gaussian_like;

/// Posterior mean and deviation factors `(a, b, v)` for one transition
///
/// `x_next = a * x_scaled + b * x0 + v * noise`
pub fn coefficients(sigma: f32, sigma_next: f32) -> (f32, f32, f32) {
    let sigma_sq = sigma * sigma;
    let next_sq = sigma_next * sigma_next;
    let ratio = next_sq / sigma_sq;

    let factor_a = ratio * ((sigma_sq + 1.0) / (next_sq + 1.0)).sqrt();
    let factor_b = (1.0 - ratio) / (next_sq + 1.0).sqrt();
    let deviation = (ratio * (sigma_sq - next_sq) / (next_sq + 1.0)).sqrt();

    (factor_a, factor_b, deviation)
}

/// One DDPM step on the unscaled latent
pub fn step<B: Backend>(
    sample: Tensor<B, 4>,
    predict: Tensor<B, 4>,
    sigma: f32,
    sigma_next: f32,
    rng: &mut StdRng,
) -> Tensor<B, 4> {
    let (factor_a, factor_b, deviation) = coefficients(sigma, sigma_next);
    let scaled = sample / (sigma * sigma + 1.0).sqrt();

    let mut out = scaled * factor_a + predict * factor_b;
    if sigma_next > 0.0 {
        let noise = gaussian_like(rng, &out);
        out = out + noise * deviation;
    }

    out * (sigma_next * sigma_next + 1.0).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_step_keeps_only_prediction() {
        let (a, b, v) = coefficients(3.0, 0.0);
        assert_eq!(a, 0.0);
        assert_eq!(b, 1.0);
        assert_eq!(v, 0.0);
    }

    #[test]
    fn test_coefficients_match_alpha_form() {
        // With alpha = 1 / (sigma^2 + 1) the posterior mean coefficient of x0 is
        // sqrt(alpha_next) * beta / (1 - alpha)
        let (sigma, sigma_next) = (2.0f32, 1.0f32);
        let alpha = 1.0 / (sigma * sigma + 1.0);
        let alpha_next = 1.0 / (sigma_next * sigma_next + 1.0);
        let beta = 1.0 - alpha / alpha_next;
        let expected_b = alpha_next.sqrt() * beta / (1.0 - alpha);

        let (_, b, _) = coefficients(sigma, sigma_next);
        assert!((b - expected_b).abs() < 1e-5);
    }
}
