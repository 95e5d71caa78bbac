//! Reporting utilities: run rankings and terminal output.

pub mod format;

pub use format::*;

use crate::domain::FitRecord;

/// The `top_n` runs with the lowest finite cost, best first.
///
/// Ties keep run order; runs with a non-finite cost are listed after all
/// finite ones.
pub fn rank_runs(records: &[FitRecord], top_n: usize) -> Vec<&FitRecord> {
    let mut sorted: Vec<&FitRecord> = records.iter().collect();
    sorted.sort_by(|a, b| match (a.cost.is_finite(), b.cost.is_finite()) {
        (true, true) => a.cost.total_cmp(&b.cost),
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        (false, false) => std::cmp::Ordering::Equal,
    });
    sorted.truncate(top_n);
    sorted
}
