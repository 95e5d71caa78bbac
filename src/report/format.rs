//! Formatted terminal output.
//!
//! We keep formatting code in one place so the fitting code stays free of
//! presentation concerns.

use crate::domain::{FitConfig, FitRecord, KineticParams, PARAM_NAMES};
use crate::fit::MultiStartOutput;
use crate::io::export::{DatasetSummary, ResultPaths};
use crate::report::rank_runs;

/// Format the full run summary (datasets, best parameters, ranked runs, outputs).
pub fn format_run_summary(
    config: &FitConfig,
    datasets: &[DatasetSummary],
    output: &MultiStartOutput,
    paths: &ResultPaths,
) -> String {
    let mut out = String::new();

    out.push_str("=== cre-fit - Cre/loxP biacore kinetic fit ===\n");
    for d in datasets {
        out.push_str(&format!(
            "{:<4} {} | rows={} | conc={} {} | t=[{:.2}, {:.2}] n={} | ta={}\n",
            d.kind.display_name(),
            d.path.display(),
            d.rows_read,
            d.concentrations.len(),
            fmt_vec(&d.concentrations, 3),
            d.t_first,
            d.t_last,
            d.n_times,
            d.ta,
        ));
    }
    out.push_str(&format!(
        "Runs: {} | eps={} | seed={} | {}\n",
        config.iterations,
        config.eps,
        config.seed,
        if config.parallel { "parallel" } else { "sequential" }
    ));

    match output.best_record() {
        Some(best) => {
            out.push_str(&format!("\nBest run: #{} cost={:.6e}\n", best.run, best.cost));
            out.push_str(&format_params(&best.params));
        }
        None => out.push_str("\nNo run reached a finite cost.\n"),
    }

    out.push_str("\nRuns by cost:\n");
    out.push_str(&format_run_table(&rank_runs(&output.records, config.top_n)));

    out.push_str("\nOutputs:\n");
    for p in paths.all() {
        out.push_str(&format!("- {}\n", p.display()));
    }
    out.push_str(&format!("- {} (progress log)\n", config.log_path.display()));

    out
}

/// One `name = value` line per parameter.
pub fn format_params(p: &KineticParams) -> String {
    let mut out = String::new();
    for (name, v) in PARAM_NAMES.iter().zip(p.to_array()) {
        out.push_str(&format!("  {name:<7}= {v:.6e}\n"));
    }
    out
}

fn format_run_table(rows: &[&FitRecord]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:>5} {:>14} {:>6} {:<24}\n", "run", "cost", "evals", "termination").trim_end());
    out.push('\n');
    out.push_str(&format!("{:->5} {:->14} {:->6} {:-<24}\n", "", "", "", "").trim_end());
    out.push('\n');

    for r in rows {
        out.push_str(
            format!(
                "{:>5} {:>14.6e} {:>6} {:<24}\n",
                r.run,
                r.cost,
                r.evaluations,
                truncate(&r.termination, 24)
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

fn fmt_vec(v: &[f64], decimals: usize) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.decimals$}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
