//! Data sources other than measured biacore tables.

pub mod synth;

pub use synth::*;
