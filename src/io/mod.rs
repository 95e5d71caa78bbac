//! Input/output helpers.
//!
//! - biacore table ingest + validation (`ingest`)
//! - result exports (text matrices, JSON summary, tables) (`export`)
//! - append-only progress log (`progress`)

pub mod export;
pub mod ingest;
pub mod progress;

pub use export::*;
pub use ingest::*;
pub use progress::*;
