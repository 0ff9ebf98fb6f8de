use anyhow::Result;
use bench_runner::{BenchConfig, ConfigOverrides, ReportError, ResultLineRule, Summary, TrialError};
use chrono::{DateTime, Local};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "bench", version, about = "Run a solver over numbered inputs and score the batch")]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Debug, Default)]
struct ConfigArgs {
    /// YAML file with batch settings; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of trials (input files 0000.txt onward)
    #[arg(long)]
    trials: Option<usize>,
    /// Worker threads; defaults to the number of available cores
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long)]
    input_dir: Option<PathBuf>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// CSV file the per-trial table is written to
    #[arg(long)]
    report: Option<PathBuf>,
    /// Read the result from the last stderr line starting with this prefix
    #[arg(long)]
    marker: Option<String>,
    /// Solver program and its arguments
    #[arg(last = true)]
    solver: Vec<String>,
}

impl ConfigArgs {
    fn resolve(self) -> Result<BenchConfig> {
        let overrides = ConfigOverrides {
            trials: self.trials,
            solver: Some(self.solver),
            input_dir: self.input_dir,
            output_dir: self.output_dir,
            report_path: self.report,
            workers: self.workers,
            result_line: self.marker.map(ResultLineRule::Marker),
        };
        BenchConfig::resolve(self.config.as_deref(), overrides)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the batch, print the summary and write the report
    Run {
        #[command(flatten)]
        config: ConfigArgs,
        #[arg(long)]
        json: bool,
    },
    /// Print the summary of an existing report
    Summarize {
        report: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved configuration without running anything
    Describe {
        #[command(flatten)]
        config: ConfigArgs,
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error(error_code(&err), format!("{:#}", err), error_details(&err)));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run { config, json } => {
            let config = config.resolve()?;
            let start = Instant::now();
            if json {
                let outcome = bench_runner::run_batch(&config, |_| {})?;
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "started_at": outcome.started_at.to_rfc3339(),
                    "config": config_to_json(&config),
                    "workers": outcome.workers,
                    "summary": summary_to_json(&outcome.summary),
                    "report": outcome.report_path.display().to_string(),
                    "elapsed_secs": start.elapsed().as_secs_f64()
                })));
            }
            println!("{}", start_line(Local::now()));
            let outcome = bench_runner::run_trials(&config, |record| {
                print!("{}", progress_marker(record.index));
                let _ = std::io::stdout().flush();
            })?;
            println!();
            print_summary(&outcome.summary);
            bench_runner::write_report(&outcome.report_path, &outcome.records)?;
            println!("{}", elapsed_line(start.elapsed().as_secs_f64()));
        }
        Commands::Summarize { report, json } => {
            let records = bench_runner::read_report(&report)?;
            let summary = Summary::from_records(&records)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "summarize",
                    "report": report.display().to_string(),
                    "summary": summary_to_json(&summary)
                })));
            }
            print_summary(&summary);
        }
        Commands::Describe { config, json } => {
            let config = config.resolve()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "config": config_to_json(&config),
                    "workers": config.effective_workers()
                })));
            }
            println!("solver: {}", config.solver.join(" "));
            println!("trials: {}", config.trials);
            println!("workers: {}", config.effective_workers());
            println!("input_dir: {}", config.input_dir.display());
            println!("output_dir: {}", config.output_dir.display());
            println!("report: {}", config.report_path.display());
            match &config.result_line {
                ResultLineRule::SecondToLast => println!("result_line: second_to_last"),
                ResultLineRule::Marker(m) => println!("result_line: marker {:?}", m),
            }
        }
    }
    Ok(None)
}

fn start_line(now: DateTime<Local>) -> String {
    format!("start:  {}", now.format("%Y-%m-%d %H:%M:%S%.6f"))
}

fn progress_marker(index: usize) -> String {
    format!("\r end {}", index)
}

fn elapsed_line(secs: f64) -> String {
    format!("end elapsed time: {:.2}s", secs)
}

fn write_summary<W: Write>(out: &mut W, summary: &Summary) -> std::io::Result<()> {
    for line in summary.lines() {
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

fn print_summary(summary: &Summary) {
    let _ = write_summary(&mut std::io::stdout().lock(), summary);
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn error_code(err: &anyhow::Error) -> &'static str {
    if let Some(trial) = err.downcast_ref::<TrialError>() {
        return trial.code();
    }
    match err.downcast_ref::<ReportError>() {
        Some(ReportError::EmptyBatch) => "empty_batch",
        Some(ReportError::Malformed { .. }) => "report_malformed",
        Some(ReportError::Io { .. }) => "report_io_error",
        None => "command_failed",
    }
}

fn error_details(err: &anyhow::Error) -> Value {
    match err.downcast_ref::<TrialError>() {
        Some(trial) => json!({ "trial": trial.index() }),
        None => json!({}),
    }
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Summarize { json, .. }
        | Commands::Describe { json, .. } => *json,
    }
}

fn config_to_json(config: &BenchConfig) -> Value {
    serde_json::to_value(config).unwrap_or_else(|_| json!({}))
}

fn summary_to_json(summary: &Summary) -> Value {
    serde_json::to_value(summary).unwrap_or_else(|_| json!({}))
}
