//! Mass-action kinetics of Cre binding to half and full loxP constructs.
//!
//! State vectors:
//! - half: `(C, B1)`: free ligand near the surface, bound sites
//! - full: `(C, B1, B2)`: free ligand, singly bound, doubly bound
//!
//! Both models share:
//! - a transport term feeding ligand at `C0` while `t < ta`, then washing it out
//! - mass-action fluxes `k_on * C * free - k_off * bound`
//!
//! Ligand consumption is scaled by `1/alp`; bound-state derivatives are not.

use nalgebra::DMatrix;

use crate::domain::{ExperimentKind, ExperimentRates};
use crate::math::OdeSystem;

/// Injection profile of one sensorgram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Forcing {
    /// Injected ligand concentration.
    pub c0: f64,
    /// End of the injection phase.
    pub ta: f64,
}

/// A mass-action flux and its gradient with respect to `(C, B1, B2)`.
#[derive(Debug, Clone, Copy, Default)]
struct Flux {
    rate: f64,
    grad: [f64; 3],
}

/// Number of state variables of a model.
pub fn state_dim(kind: ExperimentKind) -> usize {
    match kind {
        ExperimentKind::Half => 2,
        ExperimentKind::Full => 3,
    }
}

/// Observable response (resonance units) of a state.
///
/// Doubly bound molecules count twice on the full construct.
pub fn readout(kind: ExperimentKind, y: &[f64]) -> f64 {
    match kind {
        ExperimentKind::Half => y[1],
        ExperimentKind::Full => y[1] + 2.0 * y[2],
    }
}

/// Ligand supply: inflow at `c0` before `ta`, pure washout from `ta` on.
pub fn transport(t: f64, c: f64, kt: f64, forcing: Forcing) -> f64 {
    if t < forcing.ta {
        kt * (forcing.c0 - c)
    } else {
        kt * (-c)
    }
}

fn mass_action(k_on: f64, ligand: f64, free: f64, k_off: f64, bound: f64) -> f64 {
    k_on * ligand * free - k_off * bound
}

/// Binding fluxes of the first and second step (second is zero on half sites).
fn binding_fluxes(kind: ExperimentKind, y: &[f64], r: &ExperimentRates) -> [Flux; 2] {
    match kind {
        ExperimentKind::Half => {
            let (c, b1) = (y[0], y[1]);
            let b0 = r.rumax - b1;
            let first = Flux {
                rate: mass_action(r.k1, c, b0, r.km1, b1),
                grad: [r.k1 * b0, -r.k1 * c - r.km1, 0.0],
            };
            [first, Flux::default()]
        }
        ExperimentKind::Full => {
            let (c, b1, b2) = (y[0], y[1], y[2]);
            let b0 = r.rumax / 2.0 - b1 - b2;
            // Two equivalent free sites per molecule for the first event.
            let first = Flux {
                rate: mass_action(2.0 * r.k1, c, b0, r.km1, b1),
                grad: [2.0 * r.k1 * b0, -2.0 * r.k1 * c - r.km1, -2.0 * r.k1 * c],
            };
            let second = Flux {
                rate: mass_action(r.k2, c, b1, 2.0 * r.km2, b2),
                grad: [r.k2 * b1, r.k2 * c, -2.0 * r.km2],
            };
            [first, second]
        }
    }
}

/// Evaluate `dy/dt` for the given model.
///
/// No clamping is applied: negative or non-finite inputs flow straight through.
///
/// # Panics
/// Panics if `y` or `dydt` is shorter than `state_dim(kind)`.
pub fn derivative(
    kind: ExperimentKind,
    t: f64,
    y: &[f64],
    rates: &ExperimentRates,
    forcing: Forcing,
    dydt: &mut [f64],
) {
    let [f1, f2] = binding_fluxes(kind, y, rates);
    dydt[0] = transport(t, y[0], rates.kt, forcing) - (f1.rate + f2.rate) / rates.alp;
    dydt[1] = f1.rate - f2.rate;
    if kind == ExperimentKind::Full {
        dydt[2] = f2.rate;
    }
}

/// Analytic Jacobian `∂(dy/dt)/∂y`, written into the top-left `n × n` block of `jac`.
///
/// # Panics
/// Panics if `jac` is smaller than `state_dim(kind)` in either dimension.
pub fn state_jacobian(kind: ExperimentKind, y: &[f64], rates: &ExperimentRates, jac: &mut DMatrix<f64>) {
    let n = state_dim(kind);
    let [f1, f2] = binding_fluxes(kind, y, rates);
    for j in 0..n {
        let transport_slope = if j == 0 { -rates.kt } else { 0.0 };
        jac[(0, j)] = transport_slope - (f1.grad[j] + f2.grad[j]) / rates.alp;
        jac[(1, j)] = f1.grad[j] - f2.grad[j];
        if n == 3 {
            jac[(2, j)] = f2.grad[j];
        }
    }
}

/// One sensorgram as an ODE system: model + rates + injection.
#[derive(Debug, Clone, Copy)]
pub struct KineticSystem {
    pub kind: ExperimentKind,
    pub rates: ExperimentRates,
    pub forcing: Forcing,
}

impl OdeSystem for KineticSystem {
    fn ndim(&self) -> usize {
        state_dim(self.kind)
    }

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        derivative(self.kind, t, y, &self.rates, self.forcing, dydt);
    }

    fn jacobian(&self, _t: f64, y: &[f64], jac: &mut DMatrix<f64>) {
        state_jacobian(self.kind, y, &self.rates, jac);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ParamBounds;
    use crate::fit::sample_initial;
    use crate::math::{OdeOptions, solve_at_times};
    use rand::prelude::*;
    use rand::rngs::StdRng;

    fn rates(k1: f64, km1: f64, k2: f64, km2: f64) -> ExperimentRates {
        ExperimentRates {
            alp: 1.5,
            rumax: 40.0,
            kt: 0.5,
            k1,
            km1,
            k2,
            km2,
        }
    }

    const FORCING: Forcing = Forcing { c0: 25.0, ta: 90.0 };

    #[test]
    fn zero_rates_give_no_binding() {
        let r = rates(0.0, 0.0, 0.0, 0.0);
        for &t in &[-5.0, 0.0, 45.0, 90.0, 500.0] {
            let mut dh = [f64::NAN; 2];
            derivative(ExperimentKind::Half, t, &[3.0, 7.0], &r, FORCING, &mut dh);
            assert_eq!(dh[1], 0.0);

            let mut df = [f64::NAN; 3];
            derivative(ExperimentKind::Full, t, &[3.0, 4.0, 2.0], &r, FORCING, &mut df);
            assert_eq!(df[1], 0.0);
            assert_eq!(df[2], 0.0);
        }
    }

    #[test]
    fn half_transport_jumps_by_kt_c0_at_switch() {
        let r = rates(0.3, 0.02, 0.0, 0.0);
        let y = [4.0, 10.0];
        let mut before = [0.0; 2];
        let mut after = [0.0; 2];
        derivative(ExperimentKind::Half, FORCING.ta - 1e-9, &y, &r, FORCING, &mut before);
        derivative(ExperimentKind::Half, FORCING.ta, &y, &r, FORCING, &mut after);
        let jump = before[0] - after[0];
        assert!((jump - r.kt * FORCING.c0).abs() < 1e-12, "jump={jump}");
        assert_eq!(before[1], after[1]);
    }

    #[test]
    fn full_model_matches_hand_computed_terms() {
        let r = rates(0.2, 0.05, 0.1, 0.01);
        let y = [2.0, 3.0, 1.0];
        let mut d = [0.0; 3];
        derivative(ExperimentKind::Full, 10.0, &y, &r, FORCING, &mut d);

        let b0 = r.rumax / 2.0 - y[1] - y[2];
        let dc = r.kt * (FORCING.c0 - y[0]) - 2.0 * (r.k1 / r.alp) * y[0] * b0 + (r.km1 / r.alp) * y[1]
            - (r.k2 / r.alp) * y[0] * y[1]
            + 2.0 * (r.km2 / r.alp) * y[2];
        let db1 = 2.0 * r.k1 * y[0] * b0 - r.km1 * y[1] - r.k2 * y[0] * y[1] + 2.0 * r.km2 * y[2];
        let db2 = r.k2 * y[0] * y[1] - 2.0 * r.km2 * y[2];
        assert!((d[0] - dc).abs() < 1e-12);
        assert!((d[1] - db1).abs() < 1e-12);
        assert!((d[2] - db2).abs() < 1e-12);
    }

    #[test]
    fn analytic_jacobian_matches_finite_differences() {
        let r = rates(0.7, 0.03, 0.2, 0.004);
        for kind in ExperimentKind::ALL {
            let n = state_dim(kind);
            let y: Vec<f64> = [5.0, 3.0, 1.5][..n].to_vec();
            let mut analytic = DMatrix::zeros(n, n);
            state_jacobian(kind, &y, &r, &mut analytic);

            let h = 1e-6;
            for j in 0..n {
                let mut yp = y.clone();
                let mut ym = y.clone();
                yp[j] += h;
                ym[j] -= h;
                let mut fp = vec![0.0; n];
                let mut fm = vec![0.0; n];
                derivative(kind, 10.0, &yp, &r, FORCING, &mut fp);
                derivative(kind, 10.0, &ym, &r, FORCING, &mut fm);
                for i in 0..n {
                    let fd = (fp[i] - fm[i]) / (2.0 * h);
                    assert!(
                        (fd - analytic[(i, j)]).abs() < 1e-5 * (1.0 + fd.abs()),
                        "{kind:?} J[{i},{j}]: fd={fd} analytic={}",
                        analytic[(i, j)]
                    );
                }
            }
        }
    }

    #[test]
    fn full_model_bound_total_never_exceeds_capacity() {
        let mut rng = StdRng::seed_from_u64(7);
        let times: Vec<f64> = (0..=60).map(|i| i as f64 * 5.0).collect();
        let opts = OdeOptions::default();

        for _ in 0..25 {
            // Full configured ranges, including the stiff corner near 10^2.
            let params = sample_initial(&ParamBounds::default(), &mut rng);
            let sys = KineticSystem {
                kind: ExperimentKind::Full,
                rates: params.rates(ExperimentKind::Full),
                forcing: Forcing {
                    c0: rng.gen_range(1.0..=100.0),
                    ta: 90.0,
                },
            };
            let sol = solve_at_times(&sys, &[0.0; 3], &times, &[90.0], &opts).unwrap();
            let cap = params.rumax_full;
            for y in &sol.y {
                let total = readout(ExperimentKind::Full, y);
                assert!(total.is_finite());
                assert!(total <= cap * (1.0 + 1e-4), "B1+2B2={total} > RUmax={cap}");
                assert!(y[1] + y[2] <= cap / 2.0 * (1.0 + 1e-4));
            }
        }
    }

    #[test]
    fn readout_weights_double_binding() {
        assert_eq!(readout(ExperimentKind::Half, &[9.0, 2.0]), 2.0);
        assert_eq!(readout(ExperimentKind::Full, &[9.0, 2.0, 3.0]), 8.0);
    }
}
