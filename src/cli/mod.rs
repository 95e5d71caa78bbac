//! Command-line parsing for the Cre/loxP kinetic fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.
//!
//! Run options are layered: built-in defaults, then an optional JSON config
//! file, then the flags given here. Every flag is optional so that an absent
//! flag never overrides the config file.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::ExperimentKind;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "cre-fit", version, about = "Cre/loxP biacore kinetic parameter fitter")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Multi-start fit of the 8 kinetic parameters to both experiments.
    Fit(FitArgs),
    /// Simulate both experiments for a parameter vector and write observed vs simulated values.
    Simulate(SimulateArgs),
    /// Write a synthetic biacore table in the input format.
    Synth(SynthArgs),
}

/// Input data and integrator options shared by `fit` and `simulate`.
#[derive(Debug, Args, Clone, Default)]
pub struct DataArgs {
    /// JSON config file (missing fields keep their defaults).
    #[arg(short = 'c', long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Half loxP biacore table.
    #[arg(long, value_name = "PATH")]
    pub half: Option<PathBuf>,

    /// Full loxP biacore table.
    #[arg(long, value_name = "PATH")]
    pub full: Option<PathBuf>,

    /// End of the injection phase for the half experiment (s).
    #[arg(long)]
    pub ta_half: Option<f64>,

    /// End of the injection phase for the full experiment (s).
    #[arg(long)]
    pub ta_full: Option<f64>,

    /// First row position (within each concentration group) used for fitting.
    #[arg(long)]
    pub window_start: Option<usize>,

    /// Row position (exclusive) where the fitted window ends.
    #[arg(long)]
    pub window_end: Option<usize>,

    /// Row stride inside the window.
    #[arg(long)]
    pub window_stride: Option<usize>,

    /// Field delimiter of the input tables; a tab or space splits on any whitespace.
    #[arg(long)]
    pub delimiter: Option<char>,

    /// Noise floor added to observed values in relative residuals.
    #[arg(long)]
    pub eps: Option<f64>,

    /// ODE relative tolerance.
    #[arg(long)]
    pub rtol: Option<f64>,

    /// ODE absolute tolerance.
    #[arg(long)]
    pub atol: Option<f64>,

    /// ODE step budget per integration.
    #[arg(long)]
    pub max_steps: Option<usize>,
}

/// Options for `fit`.
#[derive(Debug, Args, Clone, Default)]
pub struct FitArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Number of multi-start runs.
    #[arg(short = 'n', long)]
    pub iterations: Option<usize>,

    /// Base random seed (run `i` uses `seed + i`).
    #[arg(long)]
    pub seed: Option<u64>,

    /// Distribute runs over all cores.
    #[arg(long)]
    pub parallel: bool,

    /// Solver tolerance on the relative cost reduction.
    #[arg(long)]
    pub ftol: Option<f64>,

    /// Solver tolerance on the relative parameter change.
    #[arg(long)]
    pub xtol: Option<f64>,

    /// Solver tolerance on the gradient.
    #[arg(long)]
    pub gtol: Option<f64>,

    /// Solver evaluation budget factor.
    #[arg(long)]
    pub patience: Option<usize>,

    /// Relative step of the finite-difference Jacobian.
    #[arg(long)]
    pub fd_step: Option<f64>,

    /// Progress log file.
    #[arg(long, value_name = "PATH")]
    pub log: Option<PathBuf>,

    /// Prefix of the result files (may include a directory).
    #[arg(short = 'o', long)]
    pub output_prefix: Option<String>,

    /// Number of runs listed in the terminal summary.
    #[arg(long)]
    pub top: Option<usize>,

    /// Print the resolved configuration as JSON and exit.
    #[arg(long)]
    pub print_config: bool,
}

/// Options for `simulate`.
#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub data: DataArgs,

    /// Parameter vector `alp,RUmaxh,RUmaxf,kt,k1,km1,k2,km2`.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub params: Vec<f64>,

    /// Output table.
    #[arg(short = 'o', long, default_value = "cre_fit_simulation.txt")]
    pub output: PathBuf,
}

/// Options for `synth`.
#[derive(Debug, Args, Clone)]
pub struct SynthArgs {
    /// Construct to simulate.
    #[arg(long, value_enum)]
    pub kind: ExperimentKind,

    /// Parameter vector `alp,RUmaxh,RUmaxf,kt,k1,km1,k2,km2`.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub params: Vec<f64>,

    /// Injected concentrations, one group per value.
    #[arg(long, value_delimiter = ',', required = true)]
    pub conc: Vec<f64>,

    /// First time of the grid (s); points before 0 are pre-injection baseline.
    /// The default puts row position 601 at `t = 0`.
    #[arg(long, default_value_t = -60.1, allow_hyphen_values = true)]
    pub t0: f64,

    /// Last time of the grid (s).
    #[arg(long, default_value_t = 340.0)]
    pub t1: f64,

    /// Grid spacing (s).
    #[arg(long, default_value_t = 0.1)]
    pub dt: f64,

    /// End of the injection phase (s).
    #[arg(long, default_value_t = 90.0)]
    pub ta: f64,

    /// Standard deviation of additive Gaussian noise (response units).
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Noise seed.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Field delimiter of the written table.
    #[arg(long, default_value_t = '\t')]
    pub delimiter: char,

    /// Output table.
    #[arg(short = 'o', long)]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_flags_are_optional() {
        let cli = Cli::try_parse_from(["cre-fit", "fit"]).unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert!(args.iterations.is_none());
        assert!(args.data.config.is_none());
        assert!(!args.parallel);
    }

    #[test]
    fn fit_flags_parse() {
        let cli = Cli::try_parse_from([
            "cre-fit", "fit", "-n", "5", "--seed", "3", "--half", "h.txt", "--ta-full", "85", "--parallel", "--window-stride",
            "20", "-o", "out/run_",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.iterations, Some(5));
        assert_eq!(args.seed, Some(3));
        assert_eq!(args.data.half, Some(PathBuf::from("h.txt")));
        assert_eq!(args.data.ta_full, Some(85.0));
        assert_eq!(args.data.window_stride, Some(20));
        assert_eq!(args.output_prefix.as_deref(), Some("out/run_"));
        assert!(args.parallel);
    }

    #[test]
    fn parameter_lists_split_on_commas() {
        let cli = Cli::try_parse_from([
            "cre-fit", "synth", "--kind", "full", "--params", "1.5,40,27,0.5,0.05,0.01,0.02,0.005", "--conc", "5,20",
            "-o", "x.txt",
        ])
        .unwrap();
        let Command::Synth(args) = cli.command else {
            panic!("expected synth");
        };
        assert_eq!(args.kind, ExperimentKind::Full);
        assert_eq!(args.params.len(), 8);
        assert_eq!(args.conc, vec![5.0, 20.0]);
        assert_eq!(args.t0, -60.1);
    }

    #[test]
    fn flags_after_parameter_list_are_still_parsed() {
        let cli = Cli::try_parse_from([
            "cre-fit", "simulate", "--params", "-1.5,40,27,0.5,0.05,0.01,0.02,0.005", "--half", "h.txt", "-o",
            "sim.txt",
        ])
        .unwrap();
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.params[0], -1.5);
        assert_eq!(args.params.len(), 8);
        assert_eq!(args.data.half, Some(PathBuf::from("h.txt")));
        assert_eq!(args.output, PathBuf::from("sim.txt"));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
