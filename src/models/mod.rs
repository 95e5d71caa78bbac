//! Cre/loxP binding kinetics.
//!
//! Both constructs are implemented as small, pure functions selected by
//! [`ExperimentKind`](crate::domain::ExperimentKind) so that simulation and
//! fitting code can stay generic.

pub mod kinetics;

pub use kinetics::*;
