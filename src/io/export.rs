//! Result exports.
//!
//! Fit results are written as plain numeric text matrices (one run per row,
//! `%.18e` notation, space separated) so downstream scripts can load them with
//! `numpy.loadtxt`. A JSON summary carries the configuration and every record.

use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use nalgebra::DMatrix;
use serde::Serialize;

use crate::domain::{Dataset, ExperimentKind, FitConfig, FitRecord, KineticParams, PARAM_NAMES};
use crate::error::AppError;

/// Output file locations derived from a prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPaths {
    pub p_optim: PathBuf,
    pub score: PathBuf,
    pub p_init: PathBuf,
    pub eps: PathBuf,
    pub summary: PathBuf,
}

impl ResultPaths {
    pub fn from_prefix(prefix: &str) -> Self {
        let path = |name: &str| PathBuf::from(format!("{prefix}{name}"));
        Self {
            p_optim: path("p_optim.txt"),
            score: path("score.txt"),
            p_init: path("p_init.txt"),
            eps: path("eps.txt"),
            summary: path("summary.json"),
        }
    }

    pub fn all(&self) -> [&Path; 5] {
        [&self.p_optim, &self.score, &self.p_init, &self.eps, &self.summary]
    }
}

/// Per-experiment facts recorded in the summary.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub kind: ExperimentKind,
    pub path: PathBuf,
    pub rows_read: usize,
    pub concentrations: Vec<f64>,
    pub n_times: usize,
    pub t_first: f64,
    pub t_last: f64,
    pub ta: f64,
}

impl DatasetSummary {
    pub fn new(dataset: &Dataset, path: &Path, rows_read: usize) -> Self {
        Self {
            kind: dataset.kind,
            path: path.to_path_buf(),
            rows_read,
            concentrations: dataset.concentrations.clone(),
            n_times: dataset.n_times(),
            t_first: dataset.times.first().copied().unwrap_or(f64::NAN),
            t_last: dataset.times.last().copied().unwrap_or(f64::NAN),
            ta: dataset.ta,
        }
    }
}

/// Everything `summary.json` contains.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary<'a> {
    pub generated_at: String,
    pub param_names: [&'static str; 8],
    pub config: &'a FitConfig,
    pub datasets: Vec<DatasetSummary>,
    pub records: &'a [FitRecord],
    pub best_run: Option<usize>,
}

impl<'a> RunSummary<'a> {
    pub fn new(config: &'a FitConfig, datasets: Vec<DatasetSummary>, records: &'a [FitRecord], best: Option<usize>) -> Self {
        Self {
            generated_at: Local::now().to_rfc3339(),
            param_names: PARAM_NAMES,
            config,
            datasets,
            records,
            best_run: best.map(|i| records[i].run),
        }
    }
}

/// `%.18e`-style formatting (`1.500000000000000000e+00`), `nan`/`inf` for non-finite values.
pub fn format_sci(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let s = format!("{v:.18e}");
    let Some((mantissa, exp)) = s.split_once('e') else {
        return s;
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return s;
    };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exp.abs())
}

fn create_writer(path: &Path) -> Result<BufWriter<File>, AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent).map_err(|e| AppError::io("create output directory", parent, e))?;
    }
    let file = File::create(path).map_err(|e| AppError::io("create output file", path, e))?;
    Ok(BufWriter::new(file))
}

fn write_rows<I, R>(path: &Path, rows: I) -> Result<(), AppError>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = f64>,
{
    let mut w = create_writer(path)?;
    for row in rows {
        let line: Vec<String> = row.into_iter().map(format_sci).collect();
        writeln!(w, "{}", line.join(" ")).map_err(|e| AppError::io("write", path, e))?;
    }
    w.flush().map_err(|e| AppError::io("flush", path, e))
}

fn param_rows(records: &[FitRecord], pick: fn(&FitRecord) -> &KineticParams) -> Vec<[f64; 8]> {
    records.iter().map(|r| pick(r).to_array()).collect()
}

/// Write `p_optim`, `score`, `p_init` and `eps` text files.
pub fn write_fit_results(paths: &ResultPaths, records: &[FitRecord], eps: f64) -> Result<(), AppError> {
    write_rows(&paths.p_optim, param_rows(records, |r| &r.params))?;
    write_rows(&paths.score, records.iter().map(|r| [r.cost]))?;
    write_rows(&paths.p_init, param_rows(records, |r| &r.initial))?;
    write_rows(&paths.eps, [[eps]])?;
    Ok(())
}

pub fn write_summary_json(path: &Path, summary: &RunSummary<'_>) -> Result<(), AppError> {
    let mut w = create_writer(path)?;
    serde_json::to_writer_pretty(&mut w, summary)
        .map_err(|e| AppError::new(2, format!("Failed to write summary JSON '{}': {e}", path.display())))?;
    writeln!(w).map_err(|e| AppError::io("write", path, e))?;
    w.flush().map_err(|e| AppError::io("flush", path, e))
}

/// Observed vs simulated responses, one row per (concentration, time) point.
///
/// Columns: `concentration index time observed simulated`, tab separated.
pub fn write_simulation_table(path: &Path, runs: &[(&Dataset, DMatrix<f64>)]) -> Result<(), AppError> {
    let mut w = create_writer(path)?;
    writeln!(w, "# kind\tconcentration\tindex\ttime\tobserved\tsimulated").map_err(|e| AppError::io("write", path, e))?;
    for (dataset, simulated) in runs {
        for (c, conc) in dataset.concentrations.iter().enumerate() {
            for (i, t) in dataset.times.iter().enumerate() {
                writeln!(
                    w,
                    "{}\t{conc}\t{}\t{t}\t{}\t{}",
                    dataset.kind.display_name(),
                    c + 1,
                    dataset.observed[(i, c)],
                    simulated[(i, c)]
                )
                .map_err(|e| AppError::io("write", path, e))?;
            }
        }
    }
    w.flush().map_err(|e| AppError::io("flush", path, e))
}

/// Write a dataset in the biacore input layout (`concentration index time response`).
pub fn write_biacore_table(path: &Path, dataset: &Dataset, delimiter: char) -> Result<(), AppError> {
    let mut w = create_writer(path)?;
    let d = delimiter;
    for (c, conc) in dataset.concentrations.iter().enumerate() {
        for (i, t) in dataset.times.iter().enumerate() {
            writeln!(w, "{conc}{d}{}{d}{t}{d}{}", c + 1, dataset.observed[(i, c)])
                .map_err(|e| AppError::io("write", path, e))?;
        }
    }
    w.flush().map_err(|e| AppError::io("flush", path, e))
}
