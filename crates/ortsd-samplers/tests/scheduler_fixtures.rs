//! Integration tests for the variance schedule and noise schedulers.
//!
//! Schedule fixtures were computed in double precision from the closed-form
//! beta curves.

use burn::prelude::*;
use burn_ndarray::NdArray;
use ortsd_samplers::{
    AlphaTransform, BetaSchedule, InferenceTimeline, NoiseScheduler, PredictionType,
    SchedulerConfig, SchedulerError, SchedulerKind, VarianceSchedule,
};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

type TestBackend = NdArray<f32>;

/// Relative tolerance for floating point comparisons
const EPSILON: f32 = 1e-3;

const LATENT_SHAPE: [usize; 4] = [1, 4, 8, 8];

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn assert_approx_eq(expected: f32, actual: f32, name: &str) {
    let diff = (expected - actual).abs();
    let scale = expected.abs().max(1.0);
    assert!(
        diff < EPSILON * scale,
        "{}: expected {}, got {} (diff: {})",
        name,
        expected,
        actual,
        diff
    );
}

fn values(tensor: Tensor<TestBackend, 4>) -> Vec<f32> {
    tensor.into_data().to_vec::<f32>().unwrap()
}

fn scheduler(kind: SchedulerKind, seed: i64) -> NoiseScheduler<TestBackend> {
    let config = SchedulerConfig {
        seed,
        ..Default::default()
    };
    NoiseScheduler::new(kind, config).unwrap()
}

/// Stand-in for the UNet: a fixed fraction of the scaled input
fn fake_model_output(scaled: Tensor<TestBackend, 4>) -> Tensor<TestBackend, 4> {
    scaled * 0.3
}

/// Run a full sampling loop and return the final latent
fn run_loop(scheduler: &mut NoiseScheduler<TestBackend>, steps: usize, eta: f32) -> Vec<f32> {
    let device = Default::default();
    let count = scheduler.init(steps).unwrap();
    let mut latent = scheduler.mask(LATENT_SHAPE, &device).unwrap();
    for i in 0..count {
        let scaled = scheduler.scale(latent.clone(), i).unwrap();
        let _timestep = scheduler.time(i, &device).unwrap();
        let output = fake_model_output(scaled);
        latent = scheduler.step(latent, output, i, eta).unwrap();
    }
    values(latent)
}

// ============================================================================
// Variance Schedule Tests
// ============================================================================

#[derive(Debug, Deserialize)]
struct ScheduleFixture {
    schedules: Vec<ScheduleCase>,
    timelines: Vec<TimelineCase>,
}

#[derive(Debug, Deserialize)]
struct ScheduleCase {
    beta_kind: BetaSchedule,
    alpha_kind: AlphaTransform,
    indices: Vec<usize>,
    alphas_cumprod: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct TimelineCase {
    inference_steps: usize,
    timesteps: Vec<f32>,
    sigmas: Vec<f32>,
}

fn load_fixture() -> ScheduleFixture {
    let content = fs::read_to_string(fixtures_dir().join("schedules.json"))
        .expect("Failed to read fixture");
    serde_json::from_str(&content).expect("Failed to parse fixture")
}

#[test]
fn test_schedules_match_reference() {
    for case in load_fixture().schedules {
        let schedule =
            VarianceSchedule::new(1000, 0.00085, 0.012, case.beta_kind, case.alpha_kind).unwrap();
        for (&index, &expected) in case.indices.iter().zip(&case.alphas_cumprod) {
            let actual = schedule.alpha_cumprod_at(index) as f64;
            let diff = (actual - expected).abs() / expected;
            assert!(
                diff < 1e-3,
                "{:?}/{:?} at {}: expected {}, got {}",
                case.beta_kind,
                case.alpha_kind,
                index,
                expected,
                actual
            );
        }
    }
}

#[test]
fn test_schedules_are_bounded_and_non_increasing() {
    let kinds = [
        (BetaSchedule::Linear, AlphaTransform::Cosine),
        (BetaSchedule::ScaledLinear, AlphaTransform::Cosine),
        (BetaSchedule::SquaredCosV2, AlphaTransform::Cosine),
        (BetaSchedule::SquaredCosV2, AlphaTransform::Exp),
    ];
    for (beta, alpha) in kinds {
        let schedule = VarianceSchedule::new(1000, 0.00085, 0.012, beta, alpha).unwrap();
        let alphas = schedule.alphas_cumprod();
        assert!(alphas.iter().all(|&a| a > 0.0 && a <= 1.0), "{beta:?}");
        assert!(alphas.windows(2).all(|w| w[1] <= w[0]), "{beta:?}");
    }
}

#[test]
fn test_timelines_match_reference() {
    let schedule = VarianceSchedule::sd1x().unwrap();
    for case in load_fixture().timelines {
        let timeline = InferenceTimeline::linspace(&schedule, case.inference_steps);
        assert_eq!(timeline.timesteps().len(), case.timesteps.len());
        for (i, (&e, &a)) in case.timesteps.iter().zip(timeline.timesteps()).enumerate() {
            assert_approx_eq(e, a, &format!("timestep {i} of {}", case.inference_steps));
        }
        assert_eq!(timeline.sigmas().len(), case.sigmas.len());
        for (i, (&e, &a)) in case.sigmas.iter().zip(timeline.sigmas()).enumerate() {
            assert_approx_eq(e, a, &format!("sigma {i} of {}", case.inference_steps));
        }
        assert_approx_eq(case.sigmas[0], timeline.max_sigma(), "max sigma");
    }
}

// ============================================================================
// Scheduler Loop Tests
// ============================================================================

#[test]
fn test_every_kind_walks_the_full_timeline() {
    let runnable = SchedulerKind::ALL
        .into_iter()
        .filter(|&kind| kind != SchedulerKind::UniPc);

    for kind in runnable {
        for steps in [1, 3, 20, 150] {
            let mut scheduler = scheduler(kind, 11);
            let latent = run_loop(&mut scheduler, steps, 0.5);
            assert!(
                latent.iter().all(|v| v.is_finite()),
                "{kind} produced non-finite values with {steps} steps"
            );

            let expected = if kind == SchedulerKind::Heun {
                2 * steps - 1
            } else {
                steps
            };
            assert_eq!(scheduler.num_steps(), expected, "{kind} with {steps} steps");
            assert_eq!(scheduler.sigmas().len(), expected + 1);

            let device = Default::default();
            let latent = Tensor::<TestBackend, 4>::zeros(LATENT_SHAPE, &device);
            let result = scheduler.step(latent.clone(), latent, expected, 0.0);
            assert!(matches!(
                result,
                Err(SchedulerError::StepOutOfRange { .. })
            ));
        }
    }
}

#[test]
fn test_euler_final_step_returns_prediction() {
    let device = Default::default();
    let mut scheduler = scheduler(SchedulerKind::Euler, 0);
    scheduler.init(1).unwrap();
    let sigma = scheduler.sigmas()[0];

    let sample = Tensor::<TestBackend, 4>::full(LATENT_SHAPE, 2.0, &device);
    let output = Tensor::<TestBackend, 4>::full(LATENT_SHAPE, 0.1, &device);
    let predict = 2.0 - sigma * 0.1;

    let out = scheduler.step(sample, output, 0, 0.0).unwrap();
    for v in values(out) {
        assert_approx_eq(predict, v, "euler final");
    }
}

#[test]
fn test_v_prediction_final_step() {
    let device = Default::default();
    let config = SchedulerConfig {
        prediction_kind: PredictionType::VPrediction,
        seed: 0,
        ..Default::default()
    };
    let mut scheduler = NoiseScheduler::<TestBackend>::new(SchedulerKind::Euler, config).unwrap();
    scheduler.init(1).unwrap();
    let sigma = scheduler.sigmas()[0];

    let sample = Tensor::<TestBackend, 4>::full(LATENT_SHAPE, 2.0, &device);
    let output = Tensor::<TestBackend, 4>::full(LATENT_SHAPE, 0.5, &device);
    let sigma_sq = sigma * sigma + 1.0;
    let predict = 2.0 / sigma_sq - 0.5 * sigma / sigma_sq.sqrt();

    let out = scheduler.step(sample, output, 0, 0.0).unwrap();
    for v in values(out) {
        assert_approx_eq(predict, v, "v-prediction final");
    }
}

#[test]
fn test_ddim_without_eta_ignores_seed() {
    let mut a = scheduler(SchedulerKind::Ddim, 1);
    let mut b = scheduler(SchedulerKind::Ddim, 2);

    // same starting latent, different noise streams
    let device = Default::default();
    let count = a.init(10).unwrap();
    b.init(10).unwrap();
    let start = Tensor::<TestBackend, 4>::random(
        LATENT_SHAPE,
        burn::tensor::Distribution::Normal(0.0, 1.0),
        &device,
    ) * a.max_sigma().unwrap();

    let (mut la, mut lb) = (start.clone(), start);
    for i in 0..count {
        let oa = fake_model_output(a.scale(la.clone(), i).unwrap());
        let ob = fake_model_output(b.scale(lb.clone(), i).unwrap());
        la = a.step(la, oa, i, 0.0).unwrap();
        lb = b.step(lb, ob, i, 0.0).unwrap();
    }
    assert_eq!(values(la), values(lb));
}

#[test]
fn test_ddim_full_eta_matches_ddpm() {
    let mut ddim = scheduler(SchedulerKind::Ddim, 9);
    let mut ddpm = scheduler(SchedulerKind::Ddpm, 9);

    let ddim = run_loop(&mut ddim, 12, 1.0);
    let ddpm = run_loop(&mut ddpm, 12, 1.0);
    for (i, (&e, &a)) in ddpm.iter().zip(&ddim).enumerate() {
        assert_approx_eq(e, a, &format!("element {i}"));
    }
}

#[test]
fn test_same_seed_reproduces_stochastic_runs() {
    for kind in [SchedulerKind::EulerAncestral, SchedulerKind::Lcm, SchedulerKind::Ddpm] {
        let first = run_loop(&mut scheduler(kind, 1234), 8, 0.0);
        let second = run_loop(&mut scheduler(kind, 1234), 8, 0.0);
        assert_eq!(first, second, "{kind}");
    }
}

#[test]
fn test_mask_is_scaled_by_max_sigma() {
    let device = Default::default();
    let mut scheduler = scheduler(SchedulerKind::Euler, 5);
    scheduler.init(20).unwrap();
    let max_sigma = scheduler.max_sigma().unwrap();

    let mask = values(scheduler.mask([1, 4, 64, 64], &device).unwrap());
    let n = mask.len() as f32;
    let mean = mask.iter().sum::<f32>() / n;
    let std = (mask.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt();
    assert!(mean.abs() < 0.1 * max_sigma);
    assert!((std / max_sigma - 1.0).abs() < 0.05);
}

#[test]
fn test_reinit_resets_history() {
    let mut first = scheduler(SchedulerKind::Lms, 3);
    let mut second = scheduler(SchedulerKind::Lms, 3);

    // a partial run leaves history behind; init must discard it
    let device = Default::default();
    first.init(6).unwrap();
    let latent = Tensor::<TestBackend, 4>::ones(LATENT_SHAPE, &device);
    let _ = first.step(latent.clone(), latent.clone() * 0.2, 0, 0.0).unwrap();
    let _ = first.step(latent.clone(), latent * 0.2, 1, 0.0).unwrap();

    let rerun = run_loop(&mut first, 6, 0.0);
    let fresh = run_loop(&mut second, 6, 0.0);
    assert_eq!(rerun, fresh);
}
