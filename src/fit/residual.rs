//! Joint relative residuals of the half and full experiments.
//!
//! Entry `(i, c)` of an experiment contributes
//!
//! ```text
//! r = (y_sim(i, c) - y_obs(i, c)) / (y_obs(i, c) + eps)
//! ```
//!
//! The flattened vector is concentration-major: every time point of half
//! concentration 0, then half concentration 1, ..., then the full experiment
//! in the same order. The layout only depends on the dataset shapes, so two
//! evaluations at the same parameters are bit-identical.

use nalgebra::{DMatrix, DVector};

use crate::domain::{Dataset, ExperimentKind, KineticParams};
use crate::error::AppError;
use crate::fit::simulate::simulate_dataset;
use crate::math::OdeOptions;

/// Residual function over both experiments.
#[derive(Debug, Clone)]
pub struct ResidualFunction<'a> {
    half: &'a Dataset,
    full: &'a Dataset,
    ode: OdeOptions,
}

impl<'a> ResidualFunction<'a> {
    pub fn new(half: &'a Dataset, full: &'a Dataset, ode: OdeOptions) -> Result<Self, AppError> {
        if half.kind != ExperimentKind::Half || full.kind != ExperimentKind::Full {
            return Err(AppError::new(
                4,
                format!(
                    "Residual function expects (half, full) datasets, got ({}, {}).",
                    half.kind.display_name(),
                    full.kind.display_name()
                ),
            ));
        }
        Ok(Self { half, full, ode })
    }

    pub fn datasets(&self) -> [&'a Dataset; 2] {
        [self.half, self.full]
    }

    /// Total number of data points (length of the residual vector).
    pub fn n_points(&self) -> usize {
        self.half.n_points() + self.full.n_points()
    }

    /// Flattened relative residuals at `params`.
    pub fn evaluate(&self, params: &KineticParams) -> DVector<f64> {
        let mut out = Vec::with_capacity(self.n_points());
        for dataset in self.datasets() {
            let sim = simulate_dataset(dataset, params, &self.ode);
            push_relative_residuals(&sim, &dataset.observed, dataset.eps, &mut out);
        }
        DVector::from_vec(out)
    }

    /// Normalized cost: sum of squared residuals divided by the number of points.
    pub fn cost(&self, params: &KineticParams) -> f64 {
        normalized_cost(self.evaluate(params).norm_squared(), self.n_points())
    }
}

/// Append `(sim - obs) / (obs + eps)` column by column.
fn push_relative_residuals(sim: &DMatrix<f64>, obs: &DMatrix<f64>, eps: f64, out: &mut Vec<f64>) {
    // nalgebra storage is column-major, i.e. concentration-major here.
    out.extend(sim.iter().zip(obs.iter()).map(|(&s, &o)| (s - o) / (o + eps)));
}

pub fn normalized_cost(sse: f64, n_points: usize) -> f64 {
    if n_points == 0 {
        return f64::NAN;
    }
    sse / n_points as f64
}
