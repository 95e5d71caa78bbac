//! Synthetic sensorgrams from known kinetic parameters.
//!
//! Used to produce test inputs and to check that a fit recovers the
//! parameters it was generated from.

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{Dataset, ExperimentKind, KineticParams};
use crate::error::AppError;
use crate::fit::simulate::simulate;
use crate::math::OdeOptions;

/// What to generate.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthSpec {
    pub kind: ExperimentKind,
    pub params: KineticParams,
    pub concentrations: Vec<f64>,
    pub times: Vec<f64>,
    pub ta: f64,
    /// Standard deviation of additive Gaussian noise (response units); `0` for exact data.
    pub noise_sd: f64,
    pub seed: u64,
}

/// Evenly spaced grid `t0, t0 + dt, ...` up to and including `t1`.
pub fn uniform_grid(t0: f64, t1: f64, dt: f64) -> Result<Vec<f64>, AppError> {
    if !(t0.is_finite() && t1.is_finite() && dt.is_finite() && dt > 0.0 && t1 > t0) {
        return Err(AppError::new(2, format!("Invalid time grid: t0={t0}, t1={t1}, dt={dt}.")));
    }
    let n = ((t1 - t0) / dt + 1e-9).floor() as usize;
    // Rounding must not push the injection start to either side of zero.
    Ok((0..=n)
        .map(|i| t0 + i as f64 * dt)
        .map(|t| if t.abs() < 1e-9 * dt { 0.0 } else { t })
        .collect())
}

/// Simulate `spec` and add seeded noise.
///
/// The injection starts at `t = 0`: earlier grid points are the empty-surface
/// baseline (zero response). `eps` is stored in the dataset for later residual
/// evaluation.
pub fn generate(spec: &SynthSpec, eps: f64, ode: &OdeOptions) -> Result<Dataset, AppError> {
    if !(spec.noise_sd.is_finite() && spec.noise_sd >= 0.0) {
        return Err(AppError::new(2, "Noise standard deviation must be finite and >= 0."));
    }
    if !spec.params.is_finite() {
        return Err(AppError::new(2, "Synthetic parameters must be finite."));
    }

    let mut observed = DMatrix::zeros(spec.times.len(), spec.concentrations.len());
    let start = spec.times.iter().position(|t| *t >= 0.0).unwrap_or(spec.times.len());
    if start < spec.times.len() {
        let sim = simulate(spec.kind, &spec.params, &spec.concentrations, &spec.times[start..], spec.ta, ode);
        observed.rows_mut(start, sim.nrows()).copy_from(&sim);
    }
    if observed.iter().any(|v| !v.is_finite()) {
        return Err(AppError::new(
            4,
            format!("Integration of the {} model failed for the requested parameters.", spec.kind.display_name()),
        ));
    }

    if spec.noise_sd > 0.0 {
        add_noise(&mut observed, spec.noise_sd, spec.seed)?;
    }

    Dataset::new(spec.kind, spec.concentrations.clone(), spec.times.clone(), spec.ta, eps, observed)
}

fn add_noise(m: &mut DMatrix<f64>, sd: f64, seed: u64) -> Result<(), AppError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, sd).map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;
    for v in m.iter_mut() {
        *v += normal.sample(&mut rng);
    }
    Ok(())
}
