pub mod config;
pub mod parse;
pub mod pool;
pub mod record;
pub mod report;
pub mod trial;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

pub use config::{BenchConfig, ConfigError, ConfigOverrides, DEFAULT_TRIALS};
pub use parse::{parse_result_line, select_result_line, ParseError, ResultLineRule};
pub use pool::run_pool;
pub use record::{SolverResult, TrialRecord};
pub use report::{
    format_thousands, read_report, write_report, ReportError, ScoreStat, Summary, REPORT_HEADER,
};
pub use trial::{run_trial, TrialError, TrialPaths};

#[derive(Debug)]
pub struct BatchOutcome {
    pub started_at: DateTime<Local>,
    pub records: Vec<TrialRecord>,
    pub summary: Summary,
    pub report_path: PathBuf,
    pub workers: usize,
    pub elapsed_secs: f64,
}

/// Runs every trial of the batch and aggregates the results without writing
/// the report, so callers can show the summary before touching the disk.
///
/// `on_complete` sees each record as its trial finishes, in completion order.
pub fn run_trials<C>(config: &BenchConfig, on_complete: C) -> Result<BatchOutcome>
where
    C: Fn(&TrialRecord) + Sync,
{
    config.validate()?;
    let started_at = Local::now();
    let start = Instant::now();
    let workers = config.effective_workers();
    info!(
        trials = config.trials,
        workers,
        solver = %config.solver.join(" "),
        "starting batch"
    );

    let records = run_pool(
        config.trials,
        workers,
        |index| run_trial(config, index),
        |_, record| on_complete(record),
    )?;
    let summary = Summary::from_records(&records)?;

    let elapsed_secs = start.elapsed().as_secs_f64();
    info!(trials = records.len(), elapsed_secs, "trials finished");
    Ok(BatchOutcome {
        started_at,
        records,
        summary,
        report_path: config.report_path.clone(),
        workers,
        elapsed_secs,
    })
}

/// [`run_trials`] followed by writing the report.
pub fn run_batch<C>(config: &BenchConfig, on_complete: C) -> Result<BatchOutcome>
where
    C: Fn(&TrialRecord) + Sync,
{
    let outcome = run_trials(config, on_complete)?;
    write_report(&outcome.report_path, &outcome.records)
        .with_context(|| format!("batch of {} trials finished", outcome.records.len()))?;
    info!(report = %outcome.report_path.display(), "report written");
    Ok(outcome)
}
