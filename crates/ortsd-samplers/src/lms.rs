//! LMS (Linear Multi-Step) update rule
//!
//! Uses past derivatives to predict future values with higher accuracy.
//! Higher order = more past samples used = better accuracy but more memory.

use burn::prelude::*;

use crate::euler;
use crate::history::HistoryBuffer;

/// Number of trapezoid pieces used to integrate a Lagrange basis polynomial
const INTEGRATION_PIECES: usize = 1000;

/// Integrate `f` over `[from, to]` with the composite trapezoid rule
fn trapezoid(f: impl Fn(f64) -> f64, from: f64, to: f64, pieces: usize) -> f64 {
    let h = (to - from) / pieces as f64;
    let inner: f64 = (1..pieces).map(|k| f(from + h * k as f64)).sum();
    h * ((f(from) + f(to)) / 2.0 + inner)
}

/// Coefficient of the derivative `current` steps back
///
/// Integral from `sigmas[step]` to `sigmas[step + 1]` of the Lagrange basis
/// over the last `order` sigmas.
pub fn lms_coefficient(sigmas: &[f32], step: usize, order: usize, current: usize) -> f32 {
    let basis = |tau: f64| {
        (0..order)
            .filter(|&k| k != current)
            .map(|k| {
                let sigma_k = sigmas[step - k] as f64;
                (tau - sigma_k) / (sigmas[step - current] as f64 - sigma_k)
            })
            .product::<f64>()
    };

    trapezoid(
        basis,
        sigmas[step] as f64,
        sigmas[step + 1] as f64,
        INTEGRATION_PIECES,
    ) as f32
}

/// One LMS step
///
/// `history` holds derivatives newest-first and its capacity is the order.
pub fn step<B: Backend>(
    history: &mut HistoryBuffer<Tensor<B, 4>>,
    sample: Tensor<B, 4>,
    predict: Tensor<B, 4>,
    step_index: usize,
    sigmas: &[f32],
) -> Tensor<B, 4> {
    let sigma = sigmas[step_index];
    history.push_front(euler::derivative(sample.clone(), predict, sigma));

    let order = history.len().min(step_index + 1);
    let mut out = sample;
    for (current, derivative) in history.iter().take(order).enumerate() {
        let coeff = lms_coefficient(sigmas, step_index, order, current);
        out = out + derivative.clone() * coeff;
    }
    out
}
