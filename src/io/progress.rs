//! Append-only progress log.
//!
//! Every message opens the file, appends, flushes to disk and closes it again,
//! so `tail -f` on the log shows progress of a long run while it happens.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::domain::FitRecord;
use crate::error::AppError;
use crate::fit::FitObserver;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `msg` verbatim; the file handle is closed before returning.
    pub fn append(&self, msg: &str) -> Result<(), AppError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AppError::io("open progress log", &self.path, e))?;
        file.write_all(msg.as_bytes())
            .map_err(|e| AppError::io("write progress log", &self.path, e))?;
        file.flush()
            .map_err(|e| AppError::io("flush progress log", &self.path, e))?;
        file.sync_data()
            .map_err(|e| AppError::io("sync progress log", &self.path, e))?;
        Ok(())
    }

    pub fn job_started(&self) -> Result<(), AppError> {
        self.append(&format!("\nSTARTING JOB AT {}\n", Local::now().format(TIMESTAMP_FORMAT)))
    }

    pub fn loading_data(&self) -> Result<(), AppError> {
        self.append("...Loading experimental data\n")
    }

    /// `it` is 0-based.
    pub fn iteration(&self, it: usize, total: usize) -> Result<(), AppError> {
        self.append(&format!("...Performing fit iteration {it} of {total}\n"))
    }

    pub fn job_ended(&self) -> Result<(), AppError> {
        self.append(&format!("ENDING JOB AT {}\n", Local::now().format(TIMESTAMP_FORMAT)))
    }
}

impl FitObserver for ProgressLog {
    fn run_started(&self, run: usize, total: usize) -> Result<(), AppError> {
        self.iteration(run, total)
    }

    fn run_finished(&self, _record: &FitRecord) {}
}
