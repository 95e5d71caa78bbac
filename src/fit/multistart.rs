//! Multi-start Levenberg–Marquardt search.
//!
//! Every run:
//!
//! 1. draws an initial guess from its own RNG (seeded `seed + run`)
//! 2. minimizes the relative residuals with `levenberg-marquardt`
//! 3. records the best point the solver visited
//!
//! Runs are independent, so they can be spread over the rayon pool; records
//! always come back ordered by run index.

use levenberg_marquardt::LevenbergMarquardt;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::domain::{FitConfig, FitRecord, KineticParams, ParamBounds, SolverOptions};
use crate::error::AppError;
use crate::fit::problem::KineticProblem;
use crate::fit::residual::ResidualFunction;
use crate::fit::sampling::sample_initial;

/// Hooks called around each run.
pub trait FitObserver: Sync {
    /// Called before run `run` (0-based) of `total` starts; an error aborts the search.
    fn run_started(&self, _run: usize, _total: usize) -> Result<(), AppError> {
        Ok(())
    }

    fn run_finished(&self, _record: &FitRecord) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl FitObserver for NoProgress {}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiStartOptions {
    pub iterations: usize,
    pub bounds: ParamBounds,
    pub seed: u64,
    pub parallel: bool,
    pub solver: SolverOptions,
}

impl From<&FitConfig> for MultiStartOptions {
    fn from(config: &FitConfig) -> Self {
        Self {
            iterations: config.iterations,
            bounds: config.bounds,
            seed: config.seed,
            parallel: config.parallel,
            solver: config.solver,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MultiStartOutput {
    /// One record per run, ordered by run index.
    pub records: Vec<FitRecord>,
    /// Index into `records` of the lowest finite cost, if any.
    pub best: Option<usize>,
}

impl MultiStartOutput {
    pub fn best_record(&self) -> Option<&FitRecord> {
        self.best.map(|i| &self.records[i])
    }
}

/// Run `opts.iterations` independent fits.
pub fn run_multistart(
    residual: &ResidualFunction<'_>,
    opts: &MultiStartOptions,
    observer: &dyn FitObserver,
) -> Result<MultiStartOutput, AppError> {
    if opts.iterations == 0 {
        return Err(AppError::new(2, "Number of fit iterations must be > 0."));
    }

    let one_run = |run: usize| -> Result<FitRecord, AppError> {
        observer.run_started(run, opts.iterations)?;
        let mut rng = StdRng::seed_from_u64(opts.seed.wrapping_add(run as u64));
        let initial = sample_initial(&opts.bounds, &mut rng);
        let record = fit_from(residual, run, initial, &opts.solver);
        observer.run_finished(&record);
        Ok(record)
    };

    let records: Vec<FitRecord> = if opts.parallel {
        (0..opts.iterations)
            .into_par_iter()
            .map(one_run)
            .collect::<Result<_, _>>()?
    } else {
        (0..opts.iterations).map(one_run).collect::<Result<_, _>>()?
    };

    let best = select_best(&records);
    Ok(MultiStartOutput { records, best })
}

/// Minimize from a given initial guess.
///
/// Non-convergence is not an error: the record carries the best point seen
/// and the solver's termination reason.
pub fn fit_from(
    residual: &ResidualFunction<'_>,
    run: usize,
    initial: KineticParams,
    solver: &SolverOptions,
) -> FitRecord {
    let problem = KineticProblem::new(residual, &initial, solver.fd_step);
    let lm = LevenbergMarquardt::new()
        .with_ftol(solver.ftol)
        .with_xtol(solver.xtol)
        .with_gtol(solver.gtol)
        .with_patience(solver.patience);
    let (problem, report) = lm.minimize(problem);

    let (params, cost) = match problem.best() {
        Some(best) => best,
        None => {
            let params = problem.current_params();
            (params, residual.cost(&params))
        }
    };

    FitRecord {
        run,
        initial,
        params,
        cost,
        evaluations: report.number_of_evaluations,
        termination: format!("{:?}", report.termination),
        converged: report.termination.was_successful(),
    }
}

/// Lowest finite cost; ties go to the lower run index.
pub fn select_best(records: &[FitRecord]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, r) in records.iter().enumerate() {
        if !r.cost.is_finite() {
            continue;
        }
        match best {
            Some(b) if records[b].cost <= r.cost => {}
            _ => best = Some(i),
        }
    }
    best
}
