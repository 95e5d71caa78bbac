//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the fitted parameter vector and its sampling bounds (`KineticParams`, `ParamBounds`)
//! - experiment datasets (`Dataset`, `ExperimentKind`)
//! - run configuration (`FitConfig`) and per-run outputs (`FitRecord`)

pub mod types;

pub use types::*;
