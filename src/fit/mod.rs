//! Parameter estimation.
//!
//! Responsibilities:
//!
//! - simulate predicted sensorgrams for both constructs
//! - assemble the joint relative residual vector
//! - run the multi-start Levenberg–Marquardt search and pick the best run

pub mod multistart;
pub mod problem;
pub mod residual;
pub mod sampling;
pub mod simulate;

pub use multistart::*;
pub use problem::*;
pub use residual::*;
pub use sampling::*;
pub use simulate::*;
