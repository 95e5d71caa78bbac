//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - passed through the fitting pipeline without global state
//! - loaded from / written to JSON (configuration and run summaries)
//! - reused by the `simulate` and `synth` commands

use std::path::PathBuf;

use clap::ValueEnum;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Number of fitted kinetic constants.
pub const PARAM_COUNT: usize = 8;

/// Parameter names in vector order.
pub const PARAM_NAMES: [&str; PARAM_COUNT] = ["alp", "RUmaxh", "RUmaxf", "kt", "k1", "km1", "k2", "km2"];

/// Which loxP construct an experiment was run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentKind {
    /// Half loxP site: one binding site per molecule.
    Half,
    /// Full loxP site: two sites, sequential binding.
    Full,
}

impl ExperimentKind {
    pub const ALL: [ExperimentKind; 2] = [ExperimentKind::Half, ExperimentKind::Full];

    pub fn display_name(self) -> &'static str {
        match self {
            ExperimentKind::Half => "half",
            ExperimentKind::Full => "full",
        }
    }
}

/// The 8 kinetic constants fitted jointly on both experiments.
///
/// Order (see [`PARAM_NAMES`]): scaling factor `alp`, the two capacities,
/// transport rate `kt`, then forward/reverse rates for both binding steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KineticParams {
    pub alp: f64,
    #[serde(rename = "RUmaxh")]
    pub rumax_half: f64,
    #[serde(rename = "RUmaxf")]
    pub rumax_full: f64,
    pub kt: f64,
    pub k1: f64,
    pub km1: f64,
    pub k2: f64,
    pub km2: f64,
}

impl KineticParams {
    pub fn from_array(v: [f64; PARAM_COUNT]) -> Self {
        Self {
            alp: v[0],
            rumax_half: v[1],
            rumax_full: v[2],
            kt: v[3],
            k1: v[4],
            km1: v[5],
            k2: v[6],
            km2: v[7],
        }
    }

    pub fn to_array(&self) -> [f64; PARAM_COUNT] {
        [
            self.alp,
            self.rumax_half,
            self.rumax_full,
            self.kt,
            self.k1,
            self.km1,
            self.k2,
            self.km2,
        ]
    }

    /// Build from a slice; `None` unless it has exactly [`PARAM_COUNT`] entries.
    pub fn from_slice(v: &[f64]) -> Option<Self> {
        let arr: [f64; PARAM_COUNT] = v.try_into().ok()?;
        Some(Self::from_array(arr))
    }

    pub fn from_vector(v: &DVector<f64>) -> Option<Self> {
        Self::from_slice(v.as_slice())
    }

    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_row_slice(&self.to_array())
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Rates seen by one experiment's ODE model.
    ///
    /// `alp`, `kt`, `k1` and `km1` are shared by both constructs; each
    /// experiment has its own capacity.
    pub fn rates(&self, kind: ExperimentKind) -> ExperimentRates {
        let rumax = match kind {
            ExperimentKind::Half => self.rumax_half,
            ExperimentKind::Full => self.rumax_full,
        };
        ExperimentRates {
            alp: self.alp,
            rumax,
            kt: self.kt,
            k1: self.k1,
            km1: self.km1,
            k2: self.k2,
            km2: self.km2,
        }
    }
}

/// Per-experiment view of [`KineticParams`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExperimentRates {
    pub alp: f64,
    pub rumax: f64,
    pub kt: f64,
    pub k1: f64,
    pub km1: f64,
    pub k2: f64,
    pub km2: f64,
}

/// Sampling scale for a parameter's initial guesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamScale {
    /// Uniform in `[inf, sup]`.
    Linear,
    /// Uniform exponent in `[inf, sup]`, value is `10^exponent`.
    Log10,
}

/// Bounds of the initial-guess sampling box for one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamBound {
    pub inf: f64,
    pub sup: f64,
    pub scale: ParamScale,
}

impl ParamBound {
    pub const fn linear(inf: f64, sup: f64) -> Self {
        Self { inf, sup, scale: ParamScale::Linear }
    }

    pub const fn log10(inf: f64, sup: f64) -> Self {
        Self { inf, sup, scale: ParamScale::Log10 }
    }

    /// Value range in parameter space (exponentiated for log-scaled bounds).
    pub fn value_range(&self) -> (f64, f64) {
        match self.scale {
            ParamScale::Linear => (self.inf, self.sup),
            ParamScale::Log10 => (10f64.powf(self.inf), 10f64.powf(self.sup)),
        }
    }
}

/// Sampling bounds for all 8 parameters (named for readable config files).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    pub alp: ParamBound,
    #[serde(rename = "RUmaxh")]
    pub rumax_half: ParamBound,
    #[serde(rename = "RUmaxf")]
    pub rumax_full: ParamBound,
    pub kt: ParamBound,
    pub k1: ParamBound,
    pub km1: ParamBound,
    pub k2: ParamBound,
    pub km2: ParamBound,
}

impl ParamBounds {
    pub fn as_array(&self) -> [ParamBound; PARAM_COUNT] {
        [
            self.alp,
            self.rumax_half,
            self.rumax_full,
            self.kt,
            self.k1,
            self.km1,
            self.k2,
            self.km2,
        ]
    }

    pub fn validate(&self) -> Result<(), AppError> {
        for (name, b) in PARAM_NAMES.iter().zip(self.as_array()) {
            if !(b.inf.is_finite() && b.sup.is_finite()) || b.inf > b.sup {
                return Err(AppError::new(
                    2,
                    format!("Invalid bounds for {name}: inf={}, sup={} (must be finite, inf <= sup).", b.inf, b.sup),
                ));
            }
            if b.scale == ParamScale::Linear && b.inf < 0.0 {
                return Err(AppError::new(
                    2,
                    format!("Invalid bounds for {name}: linear parameters must be >= 0 (inf={}).", b.inf),
                ));
            }
        }
        Ok(())
    }
}

impl Default for ParamBounds {
    fn default() -> Self {
        Self {
            alp: ParamBound::linear(1.0, 2.5),
            rumax_half: ParamBound::linear(36.0, 44.0),
            rumax_full: ParamBound::linear(24.0, 30.0),
            kt: ParamBound::linear(0.08, 1.1),
            k1: ParamBound::log10(-3.0, 2.0),
            km1: ParamBound::log10(-3.0, 2.0),
            k2: ParamBound::log10(-4.0, 2.0),
            km2: ParamBound::log10(-4.0, 0.0),
        }
    }
}

/// Row window applied inside every concentration group of an input table.
///
/// Selected positions are `start, start + stride, ...` strictly below `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: usize,
    pub end: usize,
    pub stride: usize,
}

impl TimeWindow {
    pub fn positions(&self) -> Vec<usize> {
        if self.stride == 0 {
            return Vec::new();
        }
        (self.start..self.end).step_by(self.stride).collect()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.stride == 0 {
            return Err(AppError::new(2, "Time window stride must be > 0."));
        }
        if self.start >= self.end {
            return Err(AppError::new(
                2,
                format!("Invalid time window: start={} must be < end={}.", self.start, self.end),
            ));
        }
        Ok(())
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self { start: 601, end: 4001, stride: 10 }
    }
}

/// Where one experiment's data comes from, and its switch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSource {
    pub path: PathBuf,
    /// End of the injection phase (s).
    pub ta: f64,
}

/// Settings of the Levenberg–Marquardt solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    /// Evaluation budget factor: at most `patience * (8 + 1)` residual evaluations.
    pub patience: usize,
    /// Relative step of the central finite-difference Jacobian.
    pub fd_step: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            patience: 100,
            fd_step: 1e-3,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<(), AppError> {
        let tols = [("ftol", self.ftol), ("xtol", self.xtol), ("gtol", self.gtol)];
        for (name, v) in tols {
            if !(v.is_finite() && v >= 0.0) {
                return Err(AppError::new(2, format!("Solver {name} must be finite and >= 0.")));
            }
        }
        if self.patience == 0 {
            return Err(AppError::new(2, "Solver patience must be > 0."));
        }
        if !(self.fd_step.is_finite() && self.fd_step > 0.0) {
            return Err(AppError::new(2, "Finite-difference step must be finite and > 0."));
        }
        Ok(())
    }
}

/// Integrator tolerances exposed in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdeSettings {
    pub rtol: f64,
    pub atol: f64,
    pub max_steps: usize,
}

impl Default for OdeSettings {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-9,
            max_steps: 200_000,
        }
    }
}

impl OdeSettings {
    /// Tolerances must be finite and positive.
    pub fn validate(&self) -> Result<(), AppError> {
        for (name, v) in [("rtol", self.rtol), ("atol", self.atol)] {
            if !(v.is_finite() && v > 0.0) {
                return Err(AppError::new(4, format!("ODE {name} must be finite and > 0 (got {v}).")));
            }
        }
        if self.max_steps == 0 {
            return Err(AppError::new(4, "ODE max_steps must be > 0."));
        }
        Ok(())
    }
}

/// A full run's configuration as understood by the pipeline.
///
/// Built from defaults, an optional JSON file, then CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub half: ExperimentSource,
    pub full: ExperimentSource,
    pub window: TimeWindow,
    /// Field delimiter of the input tables. Tab (the default) or space
    /// splits on any run of whitespace.
    pub delimiter: char,

    /// Number of multi-start runs.
    pub iterations: usize,
    /// Noise floor added to observed values in relative residuals.
    pub eps: f64,
    pub bounds: ParamBounds,
    /// Base seed; run `it` samples with `seed + it`.
    pub seed: u64,
    /// Distribute runs over the rayon thread pool.
    pub parallel: bool,

    pub solver: SolverOptions,
    pub ode: OdeSettings,

    pub log_path: PathBuf,
    /// Prefix of the result files (may include a directory).
    pub output_prefix: String,
    /// Number of runs listed in the terminal summary.
    pub top_n: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            half: ExperimentSource {
                path: PathBuf::from("biacore_cre_half_loxP.txt"),
                ta: 90.0,
            },
            full: ExperimentSource {
                path: PathBuf::from("biacore_cre_full_loxP.txt"),
                ta: 90.0,
            },
            window: TimeWindow::default(),
            delimiter: '\t',
            iterations: 2,
            eps: 10.0,
            bounds: ParamBounds::default(),
            seed: 0,
            parallel: false,
            solver: SolverOptions::default(),
            ode: OdeSettings::default(),
            log_path: PathBuf::from("exploreParams_cre_fit_progress.log"),
            output_prefix: "exploreParams_cre_fit_results_".to_string(),
            top_n: 10,
        }
    }
}

impl FitConfig {
    pub fn source(&self, kind: ExperimentKind) -> &ExperimentSource {
        match kind {
            ExperimentKind::Half => &self.half,
            ExperimentKind::Full => &self.full,
        }
    }

    /// Check every setting before any file is touched.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.iterations == 0 {
            return Err(AppError::new(2, "Number of fit iterations must be > 0."));
        }
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(AppError::new(2, format!("Noise floor eps must be finite and > 0 (got {}).", self.eps)));
        }
        for kind in ExperimentKind::ALL {
            let ta = self.source(kind).ta;
            if !ta.is_finite() {
                return Err(AppError::new(
                    2,
                    format!("Switch time ta for the {} experiment must be finite.", kind.display_name()),
                ));
            }
        }
        if !self.delimiter.is_ascii() {
            return Err(AppError::new(2, "Input delimiter must be a single ASCII character."));
        }
        self.ode.validate()?;
        self.window.validate()?;
        self.bounds.validate()?;
        self.solver.validate()?;
        Ok(())
    }
}

/// One experiment's observations, ready for fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub kind: ExperimentKind,
    pub concentrations: Vec<f64>,
    pub times: Vec<f64>,
    /// Switch time of the forcing term.
    pub ta: f64,
    /// Noise floor of the relative residual.
    pub eps: f64,
    /// Observed response, `(time × concentration)`.
    pub observed: DMatrix<f64>,
}

impl Dataset {
    /// Validate and assemble a dataset.
    ///
    /// Fails when the response matrix shape disagrees with the grid and
    /// concentration list, or when the time grid is not strictly increasing.
    pub fn new(
        kind: ExperimentKind,
        concentrations: Vec<f64>,
        times: Vec<f64>,
        ta: f64,
        eps: f64,
        observed: DMatrix<f64>,
    ) -> Result<Self, AppError> {
        let name = kind.display_name();
        if times.is_empty() || concentrations.is_empty() {
            return Err(AppError::new(3, format!("The {name} dataset has no time points or no concentrations.")));
        }
        if observed.nrows() != times.len() || observed.ncols() != concentrations.len() {
            return Err(AppError::new(
                3,
                format!(
                    "Shape mismatch in the {name} dataset: response matrix is {}x{}, expected {}x{} (time x concentration).",
                    observed.nrows(),
                    observed.ncols(),
                    times.len(),
                    concentrations.len()
                ),
            ));
        }
        if times.iter().any(|t| !t.is_finite()) || times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(AppError::new(3, format!("The {name} time grid must be finite and strictly increasing.")));
        }
        if concentrations.iter().any(|c| !(c.is_finite() && *c > 0.0)) {
            return Err(AppError::new(3, format!("The {name} concentrations must be finite and > 0.")));
        }
        if !(eps.is_finite() && eps > 0.0) {
            return Err(AppError::new(2, format!("Noise floor eps must be finite and > 0 (got {eps}).")));
        }
        Ok(Self {
            kind,
            concentrations,
            times,
            ta,
            eps,
            observed,
        })
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    pub fn n_concentrations(&self) -> usize {
        self.concentrations.len()
    }

    /// Number of fitted data points (`n_times * n_concentrations`).
    pub fn n_points(&self) -> usize {
        self.n_times() * self.n_concentrations()
    }
}

/// Outcome of one multi-start run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRecord {
    pub run: usize,
    pub initial: KineticParams,
    pub params: KineticParams,
    /// Sum of squared residuals divided by the number of data points.
    pub cost: f64,
    /// Residual evaluations spent by the solver.
    pub evaluations: usize,
    /// Solver termination reason.
    pub termination: String,
    pub converged: bool,
}
