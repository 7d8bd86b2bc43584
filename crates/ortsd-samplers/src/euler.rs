//! Euler and Euler-Ancestral update rules
//!
//! Both work on the unscaled (k-diffusion) latent: `d = (x - x0) / sigma`.

use burn::prelude::*;
use rand::rngs::StdRng;

use crate::noise::gaussian_like;

/// Split a step into its deterministic and stochastic parts
///
/// Returns `(sigma_down, sigma_up)`. At the terminal step both are zero.
pub fn get_ancestral_step(sigma: f32, sigma_next: f32) -> (f32, f32) {
    if sigma_next == 0.0 {
        return (0.0, 0.0);
    }

    let sigma_up = (sigma_next.powi(2) * (sigma.powi(2) - sigma_next.powi(2)) / sigma.powi(2))
        .sqrt()
        .min(sigma_next);
    let sigma_down = (sigma_next.powi(2) - sigma_up.powi(2)).sqrt();

    (sigma_down, sigma_up)
}

/// Derivative of the probability flow ODE
pub fn derivative<B: Backend>(sample: Tensor<B, 4>, predict: Tensor<B, 4>, sigma: f32) -> Tensor<B, 4> {
    (sample - predict) / sigma
}

/// One Euler step from `sigma` to `sigma_next`
pub fn step<B: Backend>(
    sample: Tensor<B, 4>,
    predict: Tensor<B, 4>,
    sigma: f32,
    sigma_next: f32,
) -> Tensor<B, 4> {
    let d = derivative(sample.clone(), predict, sigma);
    sample + d * (sigma_next - sigma)
}

/// One Euler-Ancestral step, re-injecting noise while sigma_next > 0
pub fn ancestral_step<B: Backend>(
    sample: Tensor<B, 4>,
    predict: Tensor<B, 4>,
    sigma: f32,
    sigma_next: f32,
    rng: &mut StdRng,
) -> Tensor<B, 4> {
    let (sigma_down, sigma_up) = get_ancestral_step(sigma, sigma_next);
    let d = derivative(sample.clone(), predict, sigma);
    let out = sample + d * (sigma_down - sigma);

    if sigma_next > 0.0 {
        let noise = gaussian_like(rng, &out);
        out + noise * sigma_up
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use rand::SeedableRng;

    type TestBackend = NdArray<f32>;

    fn filled(value: f32) -> Tensor<TestBackend, 4> {
        Tensor::full([1, 4, 2, 2], value, &Default::default())
    }

    #[test]
    fn test_ancestral_step_terminal() {
        assert_eq!(get_ancestral_step(1.0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn test_ancestral_step_preserves_variance() {
        let (down, up) = get_ancestral_step(2.0, 1.0);
        assert!((down * down + up * up - 1.0).abs() < 1e-5);
        assert!(up <= 1.0);
    }

    #[test]
    fn test_euler_final_step_returns_prediction() {
        let out = step(filled(3.0), filled(0.5), 1.5, 0.0);
        let values = out.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (v - 0.5).abs() < 1e-5));
    }

    #[test]
    fn test_euler_half_step() {
        // d = (3 - 1) / 2 = 1, dt = -1
        let out = step(filled(3.0), filled(1.0), 2.0, 1.0);
        let values = out.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (v - 2.0).abs() < 1e-5));
    }

    #[test]
    fn test_ancestral_final_step_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(0);
        let out = ancestral_step(filled(3.0), filled(0.5), 1.5, 0.0, &mut rng);
        let values = out.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (v - 0.5).abs() < 1e-5));
    }
}
