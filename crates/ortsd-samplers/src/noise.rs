//! Gaussian noise drawn from a scheduler's seeded stream

use burn::prelude::*;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

/// Standard normal noise with the given shape
pub fn gaussian<B: Backend>(rng: &mut StdRng, shape: [usize; 4], device: &B::Device) -> Tensor<B, 4> {
    let count = shape.iter().product();
    let values: Vec<f32> = (0..count).map(|_| rng.sample(StandardNormal)).collect();
    Tensor::from_data(TensorData::new(values, shape), device)
}

/// Standard normal noise shaped like `like`
pub fn gaussian_like<B: Backend>(rng: &mut StdRng, like: &Tensor<B, 4>) -> Tensor<B, 4> {
    gaussian(rng, like.dims(), &like.device())
}
