//! Shared "fit pipeline" logic used by the CLI commands.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! progress log -> ingest -> multi-start fit -> result files
//!
//! The command handlers can then focus on presentation.

use nalgebra::DMatrix;

use crate::domain::{Dataset, ExperimentKind, FitConfig, KineticParams};
use crate::error::AppError;
use crate::fit::{MultiStartOptions, MultiStartOutput, ResidualFunction, run_multistart, simulate_dataset};
use crate::io::export::{DatasetSummary, ResultPaths, RunSummary, write_fit_results, write_summary_json};
use crate::io::ingest::{IngestedExperiment, load_experiment};
use crate::io::progress::ProgressLog;
use crate::math::OdeOptions;

/// All computed outputs of a single `fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub datasets: Vec<DatasetSummary>,
    pub output: MultiStartOutput,
    pub paths: ResultPaths,
}

/// Execute the full fitting pipeline and write its result files.
///
/// The progress log brackets the whole job; a failure to write it aborts
/// the run.
pub fn run_fit(config: &FitConfig) -> Result<RunOutput, AppError> {
    config.validate()?;

    let log = ProgressLog::new(&config.log_path);
    log.job_started()?;

    // 1) Load both experiments.
    log.loading_data()?;
    let [half, full] = load_both(config)?;

    // 2) Multi-start fit; the log records every run.
    let ode = OdeOptions::from(&config.ode);
    let residual = ResidualFunction::new(&half.dataset, &full.dataset, ode)?;
    let output = run_multistart(&residual, &MultiStartOptions::from(config), &log)?;

    // 3) Persist everything once, at the end.
    let paths = ResultPaths::from_prefix(&config.output_prefix);
    write_fit_results(&paths, &output.records, config.eps)?;
    let datasets = vec![summarize(&half, config, ExperimentKind::Half), summarize(&full, config, ExperimentKind::Full)];
    let summary = RunSummary::new(config, datasets.clone(), &output.records, output.best);
    write_summary_json(&paths.summary, &summary)?;

    log.job_ended()?;

    Ok(RunOutput {
        datasets,
        output,
        paths,
    })
}

/// One experiment evaluated at a fixed parameter vector.
#[derive(Debug, Clone)]
pub struct SimulatedExperiment {
    pub dataset: Dataset,
    pub simulated: DMatrix<f64>,
}

/// Simulate both configured experiments at `params`; also returns the joint cost.
pub fn run_simulation(config: &FitConfig, params: &KineticParams) -> Result<(Vec<SimulatedExperiment>, f64), AppError> {
    config.validate()?;
    let [half, full] = load_both(config)?;
    let ode = OdeOptions::from(&config.ode);

    let cost = ResidualFunction::new(&half.dataset, &full.dataset, ode.clone())?.cost(params);
    let runs = [half, full]
        .into_iter()
        .map(|ingested| {
            let simulated = simulate_dataset(&ingested.dataset, params, &ode);
            SimulatedExperiment {
                dataset: ingested.dataset,
                simulated,
            }
        })
        .collect();
    Ok((runs, cost))
}

fn load_both(config: &FitConfig) -> Result<[IngestedExperiment; 2], AppError> {
    Ok([
        load_experiment(ExperimentKind::Half, config)?,
        load_experiment(ExperimentKind::Full, config)?,
    ])
}

fn summarize(ingested: &IngestedExperiment, config: &FitConfig, kind: ExperimentKind) -> DatasetSummary {
    DatasetSummary::new(&ingested.dataset, &config.source(kind).path, ingested.rows_read)
}
