//! Adapter between [`ResidualFunction`] and the `levenberg-marquardt` solver.
//!
//! The solver works on an unconstrained vector `u`; the kinetic parameters are
//! `p = |u|`, which keeps every parameter non-negative without a bounded
//! solver. The Jacobian is taken by central finite differences on `u`.

use levenberg_marquardt::LeastSquaresProblem;
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};
use rayon::prelude::*;

use crate::domain::{KineticParams, PARAM_COUNT};
use crate::fit::residual::{ResidualFunction, normalized_cost};

/// Stand-in for non-finite residual entries.
pub const NON_FINITE_PENALTY: f64 = 1e8;

/// Absolute floor of the finite-difference step (for `u` at or near zero).
const FD_FLOOR: f64 = 1e-8;

#[derive(Debug, Clone, Copy)]
struct BestPoint {
    params: KineticParams,
    sse: f64,
}

/// Least-squares problem over the 8 kinetic parameters.
pub struct KineticProblem<'a> {
    residual: ResidualFunction<'a>,
    fd_step: f64,
    u: DVector<f64>,
    current: DVector<f64>,
    best: Option<BestPoint>,
}

impl<'a> KineticProblem<'a> {
    pub fn new(residual: &ResidualFunction<'a>, initial: &KineticParams, fd_step: f64) -> Self {
        let mut problem = Self {
            residual: residual.clone(),
            fd_step,
            u: DVector::zeros(PARAM_COUNT),
            current: DVector::zeros(0),
            best: None,
        };
        problem.set_params(&initial.to_vector());
        problem
    }

    /// Physical parameters at the current solver point.
    pub fn current_params(&self) -> KineticParams {
        reflect(&self.u)
    }

    /// Lowest-SSE point with fully finite residuals seen so far, with its normalized cost.
    pub fn best(&self) -> Option<(KineticParams, f64)> {
        self.best
            .map(|b| (b.params, normalized_cost(b.sse, self.residual.n_points())))
    }

    fn penalized_residuals(&self, u: &DVector<f64>) -> (DVector<f64>, bool) {
        let mut r = self.residual.evaluate(&reflect(u));
        let mut clean = true;
        for v in r.iter_mut() {
            if !v.is_finite() {
                *v = NON_FINITE_PENALTY;
                clean = false;
            }
        }
        (r, clean)
    }

    fn fd_column(&self, j: usize) -> DVector<f64> {
        let h = (self.fd_step * self.u[j].abs()).max(FD_FLOOR);
        let mut up = self.u.clone();
        let mut down = self.u.clone();
        up[j] += h;
        down[j] -= h;
        let (rp, _) = self.penalized_residuals(&up);
        let (rm, _) = self.penalized_residuals(&down);
        (rp - rm) / (2.0 * h)
    }
}

/// `p = |u|`, component-wise.
fn reflect(u: &DVector<f64>) -> KineticParams {
    let mut arr = [0.0; PARAM_COUNT];
    for (a, v) in arr.iter_mut().zip(u.iter()) {
        *a = v.abs();
    }
    KineticParams::from_array(arr)
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for KineticProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, u: &DVector<f64>) {
        self.u.copy_from(u);
        let (r, clean) = self.penalized_residuals(u);
        let sse = r.norm_squared();
        if clean && sse.is_finite() && self.best.is_none_or(|b| sse < b.sse) {
            self.best = Some(BestPoint {
                params: reflect(u),
                sse,
            });
        }
        self.current = r;
    }

    fn params(&self) -> DVector<f64> {
        self.u.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.current.clone())
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let columns: Vec<DVector<f64>> = (0..PARAM_COUNT).into_par_iter().map(|j| self.fd_column(j)).collect();
        Some(DMatrix::from_columns(&columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Dataset, ExperimentKind};
    use crate::fit::simulate::simulate;
    use crate::math::OdeOptions;

    fn truth() -> KineticParams {
        KineticParams::from_array([1.5, 40.0, 27.0, 0.5, 0.05, 0.01, 0.02, 0.005])
    }

    fn times() -> Vec<f64> {
        (0..=15).map(|i| i as f64 * 8.0).collect()
    }

    fn synthetic(kind: ExperimentKind) -> Dataset {
        let conc = vec![10.0, 40.0];
        let obs = simulate(kind, &truth(), &conc, &times(), 60.0, &OdeOptions::default());
        Dataset::new(kind, conc, times(), 60.0, 10.0, obs).unwrap()
    }

    #[test]
    fn negative_solver_values_are_reflected() {
        let (half, full) = (synthetic(ExperimentKind::Half), synthetic(ExperimentKind::Full));
        let f = ResidualFunction::new(&half, &full, OdeOptions::default()).unwrap();
        let mut problem = KineticProblem::new(&f, &truth(), 1e-3);

        let mut u = truth().to_vector();
        u[4] = -u[4];
        u[7] = -u[7];
        problem.set_params(&u);
        assert_eq!(problem.current_params(), truth());
        assert_eq!(problem.params(), u);
        assert!(problem.residuals().unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn non_finite_points_are_penalized_and_never_best() {
        let (half, full) = (synthetic(ExperimentKind::Half), synthetic(ExperimentKind::Full));
        let f = ResidualFunction::new(&half, &full, OdeOptions::default()).unwrap();
        let mut bad = truth();
        bad.alp = f64::NAN;
        let problem = KineticProblem::new(&f, &bad, 1e-3);

        let r = problem.residuals().unwrap();
        assert!(r.iter().all(|v| v.is_finite()));
        assert!(r.iter().any(|v| *v == NON_FINITE_PENALTY));
        assert!(problem.best().is_none());
    }

    #[test]
    fn best_point_survives_worse_trials() {
        let (half, full) = (synthetic(ExperimentKind::Half), synthetic(ExperimentKind::Full));
        let f = ResidualFunction::new(&half, &full, OdeOptions::default()).unwrap();
        let mut problem = KineticProblem::new(&f, &truth(), 1e-3);

        let mut worse = truth();
        worse.k1 *= 3.0;
        problem.set_params(&worse.to_vector());
        let (params, cost) = problem.best().unwrap();
        assert_eq!(params, truth());
        assert_eq!(cost, 0.0);
        assert_eq!(problem.current_params(), worse);
    }

    #[test]
    fn jacobian_ignores_parameters_an_experiment_does_not_use() {
        let (half, full) = (synthetic(ExperimentKind::Half), synthetic(ExperimentKind::Full));
        let f = ResidualFunction::new(&half, &full, OdeOptions::default()).unwrap();
        let mut start = truth();
        start.k1 *= 1.2;
        let problem = KineticProblem::new(&f, &start, 1e-3);

        let jac = problem.jacobian().unwrap();
        assert_eq!(jac.nrows(), f.n_points());
        assert_eq!(jac.ncols(), PARAM_COUNT);
        assert!(jac.iter().all(|v| v.is_finite()));

        let n_half = half.n_points();
        // Half rows do not depend on RUmaxf, k2 or km2; full rows not on RUmaxh.
        for row in 0..n_half {
            for col in [2, 6, 7] {
                assert_eq!(jac[(row, col)], 0.0);
            }
        }
        for row in n_half..jac.nrows() {
            assert_eq!(jac[(row, 1)], 0.0);
        }
        assert!(jac.column(4).iter().any(|v| *v != 0.0));
    }
}
