//! Initial-guess sampling for the multi-start search.

use rand::Rng;

use crate::domain::{KineticParams, PARAM_COUNT, ParamBound, ParamBounds, ParamScale};

/// Draw one value: uniform on `[inf, sup]`, or `10^x` with `x` uniform on `[inf, sup]`.
pub fn sample_value<R: Rng + ?Sized>(bound: &ParamBound, rng: &mut R) -> f64 {
    let x = if bound.sup > bound.inf {
        rng.gen_range(bound.inf..=bound.sup)
    } else {
        bound.inf
    };
    match bound.scale {
        ParamScale::Linear => x,
        ParamScale::Log10 => 10f64.powf(x),
    }
}

/// Draw a full initial guess, parameters in vector order.
pub fn sample_initial<R: Rng + ?Sized>(bounds: &ParamBounds, rng: &mut R) -> KineticParams {
    let mut arr = [0.0; PARAM_COUNT];
    for (v, b) in arr.iter_mut().zip(bounds.as_array()) {
        *v = sample_value(&b, rng);
    }
    KineticParams::from_array(arr)
}
