//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - resolves the run configuration (defaults, JSON file, flags)
//! - runs the fit / simulation / synthesis
//! - prints reports and writes outputs

use std::path::Path;

use clap::Parser;

use crate::cli::{Command, DataArgs, FitArgs, SimulateArgs, SynthArgs};
use crate::data::{SynthSpec, generate, uniform_grid};
use crate::domain::{Dataset, FitConfig, KineticParams, PARAM_COUNT};
use crate::error::AppError;
use crate::io::export::{write_biacore_table, write_simulation_table};
use crate::math::OdeOptions;

pub mod pipeline;

/// Entry point for the `cre-fit` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Synth(args) => handle_synth(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args)?;
    if args.print_config {
        let json = serde_json::to_string_pretty(&config)
            .map_err(|e| AppError::new(4, format!("Failed to serialize config: {e}")))?;
        println!("{json}");
        return Ok(());
    }

    let run = pipeline::run_fit(&config)?;
    println!(
        "{}",
        crate::report::format_run_summary(&config, &run.datasets, &run.output, &run.paths)
    );
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let config = data_config(&args.data)?;
    let params = params_from_cli(&args.params)?;
    let (runs, cost) = pipeline::run_simulation(&config, &params)?;

    let tables: Vec<(&Dataset, _)> = runs.iter().map(|r| (&r.dataset, r.simulated.clone())).collect();
    write_simulation_table(&args.output, &tables)?;

    println!("{}", crate::report::format_params(&params).trim_end());
    println!("cost={cost:.6e}");
    println!("Wrote {}", args.output.display());
    Ok(())
}

fn handle_synth(args: SynthArgs) -> Result<(), AppError> {
    let spec = SynthSpec {
        kind: args.kind,
        params: params_from_cli(&args.params)?,
        concentrations: args.conc.clone(),
        times: uniform_grid(args.t0, args.t1, args.dt)?,
        ta: args.ta,
        noise_sd: args.noise,
        seed: args.seed,
    };
    let eps = FitConfig::default().eps;
    let dataset = generate(&spec, eps, &OdeOptions::default())?;
    write_biacore_table(&args.output, &dataset, args.delimiter)?;

    println!(
        "Wrote {} ({} concentrations x {} times, {} experiment)",
        args.output.display(),
        dataset.n_concentrations(),
        dataset.n_times(),
        dataset.kind.display_name()
    );
    Ok(())
}

/// Resolve a full run configuration: defaults, then `--config`, then flags.
pub fn fit_config_from_args(args: &FitArgs) -> Result<FitConfig, AppError> {
    let mut config = data_config(&args.data)?;

    if let Some(v) = args.iterations {
        config.iterations = v;
    }
    if let Some(v) = args.seed {
        config.seed = v;
    }
    if args.parallel {
        config.parallel = true;
    }
    if let Some(v) = args.ftol {
        config.solver.ftol = v;
    }
    if let Some(v) = args.xtol {
        config.solver.xtol = v;
    }
    if let Some(v) = args.gtol {
        config.solver.gtol = v;
    }
    if let Some(v) = args.patience {
        config.solver.patience = v;
    }
    if let Some(v) = args.fd_step {
        config.solver.fd_step = v;
    }
    if let Some(v) = &args.log {
        config.log_path = v.clone();
    }
    if let Some(v) = &args.output_prefix {
        config.output_prefix = v.clone();
    }
    if let Some(v) = args.top {
        config.top_n = v;
    }

    config.validate()?;
    Ok(config)
}

/// Defaults, then `--config`, then the data/integrator flags.
fn data_config(args: &DataArgs) -> Result<FitConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => load_config_file(path)?,
        None => FitConfig::default(),
    };

    if let Some(v) = &args.half {
        config.half.path = v.clone();
    }
    if let Some(v) = &args.full {
        config.full.path = v.clone();
    }
    if let Some(v) = args.ta_half {
        config.half.ta = v;
    }
    if let Some(v) = args.ta_full {
        config.full.ta = v;
    }
    if let Some(v) = args.window_start {
        config.window.start = v;
    }
    if let Some(v) = args.window_end {
        config.window.end = v;
    }
    if let Some(v) = args.window_stride {
        config.window.stride = v;
    }
    if let Some(v) = args.delimiter {
        config.delimiter = v;
    }
    if let Some(v) = args.eps {
        config.eps = v;
    }
    if let Some(v) = args.rtol {
        config.ode.rtol = v;
    }
    if let Some(v) = args.atol {
        config.ode.atol = v;
    }
    if let Some(v) = args.max_steps {
        config.ode.max_steps = v;
    }

    config.validate()?;
    Ok(config)
}

/// Read a JSON config file; absent fields keep their defaults.
pub fn load_config_file(path: &Path) -> Result<FitConfig, AppError> {
    let text = std::fs::read_to_string(path).map_err(|e| AppError::io("read config file", path, e))?;
    serde_json::from_str(&text)
        .map_err(|e| AppError::new(2, format!("Invalid config file '{}': {e}", path.display())))
}

fn params_from_cli(values: &[f64]) -> Result<KineticParams, AppError> {
    let params = KineticParams::from_slice(values).ok_or_else(|| {
        AppError::new(
            2,
            format!(
                "Expected {PARAM_COUNT} parameters (alp,RUmaxh,RUmaxf,kt,k1,km1,k2,km2), got {}.",
                values.len()
            ),
        )
    })?;
    if !params.is_finite() {
        return Err(AppError::new(2, "Parameters must be finite."));
    }
    Ok(params)
}
