//! Numerical building blocks: adaptive stiff ODE integration.

pub mod ode;

pub use ode::*;
