//! Trajectory simulation: predicted sensorgrams for every concentration.
//!
//! Each column of the output is one injection, integrated from the empty
//! surface (zero state) over the shared time grid. A column whose integration
//! fails is filled with NaN so the failure shows up in the residuals instead
//! of aborting a fit.

use nalgebra::DMatrix;

use crate::domain::{Dataset, ExperimentKind, KineticParams};
use crate::math::{OdeOptions, solve_at_times};
use crate::models::{Forcing, KineticSystem, readout, state_dim};

/// Simulate the response matrix `(time × concentration)` of one experiment type.
pub fn simulate(
    kind: ExperimentKind,
    params: &KineticParams,
    concentrations: &[f64],
    times: &[f64],
    ta: f64,
    opts: &OdeOptions,
) -> DMatrix<f64> {
    let rates = params.rates(kind);
    let y0 = vec![0.0; state_dim(kind)];
    let mut out = DMatrix::from_element(times.len(), concentrations.len(), f64::NAN);

    for (c, &c0) in concentrations.iter().enumerate() {
        let sys = KineticSystem {
            kind,
            rates,
            forcing: Forcing { c0, ta },
        };
        if let Ok(sol) = solve_at_times(&sys, &y0, times, &[ta], opts) {
            for (i, y) in sol.y.iter().enumerate() {
                out[(i, c)] = readout(kind, y);
            }
        }
    }

    out
}

/// Simulate the experiment described by `dataset` (its kind, grid, concentrations and `ta`).
pub fn simulate_dataset(dataset: &Dataset, params: &KineticParams, opts: &OdeOptions) -> DMatrix<f64> {
    simulate(
        dataset.kind,
        params,
        &dataset.concentrations,
        &dataset.times,
        dataset.ta,
        opts,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> KineticParams {
        KineticParams::from_array([1.5, 40.0, 27.0, 0.5, 0.05, 0.01, 0.02, 0.005])
    }

    fn grid() -> Vec<f64> {
        (0..=30).map(|i| i as f64 * 4.0).collect()
    }

    #[test]
    fn output_shape_is_time_by_concentration() {
        let times = grid();
        let m = simulate(ExperimentKind::Full, &params(), &[5.0, 20.0, 80.0], &times, 60.0, &OdeOptions::default());
        assert_eq!(m.nrows(), times.len());
        assert_eq!(m.ncols(), 3);
        assert!(m.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn response_starts_at_zero_and_rises_during_injection() {
        let times = grid();
        let m = simulate(ExperimentKind::Half, &params(), &[20.0], &times, 60.0, &OdeOptions::default());
        assert_eq!(m[(0, 0)], 0.0);
        let at_switch = times.iter().position(|&t| t == 60.0).unwrap();
        assert!(m[(at_switch, 0)] > m[(1, 0)]);
        assert!(m[(at_switch, 0)] <= 40.0);
        // Dissociation phase decays.
        assert!(m[(times.len() - 1, 0)] < m[(at_switch, 0)]);
    }

    #[test]
    fn higher_concentration_binds_more() {
        let times = grid();
        let m = simulate(ExperimentKind::Half, &params(), &[5.0, 80.0], &times, 60.0, &OdeOptions::default());
        let at_switch = times.iter().position(|&t| t == 60.0).unwrap();
        assert!(m[(at_switch, 1)] > m[(at_switch, 0)]);
    }

    #[test]
    fn zero_rates_give_flat_zero_response() {
        let p = KineticParams::from_array([1.5, 40.0, 27.0, 0.5, 0.0, 0.0, 0.0, 0.0]);
        let times = grid();
        for kind in ExperimentKind::ALL {
            let m = simulate(kind, &p, &[10.0, 50.0], &times, 60.0, &OdeOptions::default());
            assert!(m.iter().all(|v| *v == 0.0), "{kind:?}");
        }
    }

    #[test]
    fn failed_integration_yields_nan_column() {
        let p = KineticParams::from_array([f64::NAN, 40.0, 27.0, 0.5, 0.05, 0.01, 0.02, 0.005]);
        let times = grid();
        let m = simulate(ExperimentKind::Half, &p, &[10.0], &times, 60.0, &OdeOptions::default());
        assert!(m.iter().skip(1).all(|v| v.is_nan()));
    }

    #[test]
    fn dataset_helper_uses_dataset_grid() {
        let times = grid();
        let d = Dataset::new(
            ExperimentKind::Full,
            vec![10.0, 40.0],
            times.clone(),
            60.0,
            10.0,
            DMatrix::zeros(times.len(), 2),
        )
        .unwrap();
        let a = simulate_dataset(&d, &params(), &OdeOptions::default());
        let b = simulate(ExperimentKind::Full, &params(), &[10.0, 40.0], &times, 60.0, &OdeOptions::default());
        assert_eq!(a, b);
    }
}
