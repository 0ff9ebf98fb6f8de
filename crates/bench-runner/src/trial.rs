use crate::config::BenchConfig;
use crate::parse::{parse_result_line, ParseError};
use crate::record::TrialRecord;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// Number of diagnostic lines quoted when the solver exits unsuccessfully.
const STDERR_TAIL_LINES: usize = 5;

#[derive(Debug, Error)]
pub enum TrialError {
    #[error("trial {index:04}: input file not found: {}", .path.display())]
    MissingInput { index: usize, path: PathBuf },
    #[error("trial {index:04}: {action} {}: {source}", .path.display())]
    Io {
        index: usize,
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("trial {index:04}: failed to launch solver `{program}`: {source}")]
    Spawn {
        index: usize,
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("trial {index:04}: solver exited with status {status}; stderr tail:\n{stderr_tail}")]
    SolverFailed {
        index: usize,
        status: String,
        stderr_tail: String,
    },
    #[error("trial {index:04}: {source}")]
    Parse {
        index: usize,
        #[source]
        source: ParseError,
    },
}

impl TrialError {
    pub fn index(&self) -> usize {
        match self {
            TrialError::MissingInput { index, .. }
            | TrialError::Io { index, .. }
            | TrialError::Spawn { index, .. }
            | TrialError::SolverFailed { index, .. }
            | TrialError::Parse { index, .. } => *index,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TrialError::MissingInput { .. } => "missing_input",
            TrialError::Io { .. } => "trial_io_error",
            TrialError::Spawn { .. } => "solver_spawn_failed",
            TrialError::SolverFailed { .. } => "solver_exit_nonzero",
            TrialError::Parse { .. } => "result_line_invalid",
        }
    }
}

/// Input and output files of one trial, named by the zero-padded index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialPaths {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl TrialPaths {
    pub fn new(config: &BenchConfig, index: usize) -> Self {
        let file_name = trial_file_name(index);
        Self {
            input: config.input_dir.join(&file_name),
            output: config.output_dir.join(&file_name),
        }
    }
}

pub fn trial_file_name(index: usize) -> String {
    format!("{:04}.txt", index)
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    if lines.is_empty() {
        "(no diagnostic output)".to_string()
    } else {
        lines[start..].join("\n")
    }
}

fn io_error(index: usize, action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> TrialError {
    let path = path.to_path_buf();
    move |source| TrialError::Io {
        index,
        action,
        path,
        source,
    }
}

/// Runs the solver once on the trial's input file and parses its result line.
///
/// Standard input is the input file, standard output goes to the output file
/// (left on disk for inspection) and the diagnostic stream is captured.
pub fn run_trial(config: &BenchConfig, index: usize) -> Result<TrialRecord, TrialError> {
    let paths = TrialPaths::new(config, index);
    if !paths.input.is_file() {
        return Err(TrialError::MissingInput {
            index,
            path: paths.input,
        });
    }
    if let Some(parent) = paths.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(index, "failed to create", parent))?;
    }
    let input = File::open(&paths.input).map_err(io_error(index, "failed to open", &paths.input))?;
    let output =
        File::create(&paths.output).map_err(io_error(index, "failed to create", &paths.output))?;

    let (program, args) = match config.solver.split_first() {
        Some((program, args)) => (program.as_str(), args),
        None => ("", &[][..]),
    };
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::from(input));
    cmd.stdout(Stdio::from(output));
    cmd.stderr(Stdio::piped());

    debug!(trial = index, input = %paths.input.display(), "starting solver");
    let start = Instant::now();
    let result = cmd.output().map_err(|source| TrialError::Spawn {
        index,
        program: program.to_string(),
        source,
    })?;
    let elapsed = start.elapsed().as_secs_f64();
    let stderr = String::from_utf8_lossy(&result.stderr);

    if !result.status.success() {
        let status = result
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(TrialError::SolverFailed {
            index,
            status,
            stderr_tail: stderr_tail(&stderr),
        });
    }

    let solver_result = parse_result_line(&stderr, &config.result_line)
        .map_err(|source| TrialError::Parse { index, source })?;
    debug!(trial = index, elapsed_secs = elapsed, "solver finished");
    Ok(TrialRecord::new(index, solver_result, elapsed))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::parse::ResultLineRule;
    use chrono::Utc;

    pub(crate) const RESULT_LINE: &str =
        r#"{"N":40,"T":8050,"S":1.0,"estimated score":1000,"score":2000,"real score":1900}"#;

    pub(crate) fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "bench_{}_test_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(root.join("in")).expect("temp input dir");
        root
    }

    pub(crate) fn write_inputs(root: &Path, count: usize) {
        for i in 0..count {
            fs::write(root.join("in").join(trial_file_name(i)), format!("{}\n", i))
                .expect("write input");
        }
    }

    /// Solver that echoes its input to stdout and `stderr_script` to stderr.
    pub(crate) fn sh_config(root: &Path, trials: usize, stderr_script: &str) -> BenchConfig {
        BenchConfig {
            trials,
            solver: vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("cat; {}", stderr_script),
            ],
            input_dir: root.join("in"),
            output_dir: root.join("out"),
            report_path: root.join("result.csv"),
            workers: Some(2),
            result_line: ResultLineRule::SecondToLast,
        }
    }

    #[test]
    fn trial_paths_are_zero_padded() {
        let config = BenchConfig::default();
        let paths = TrialPaths::new(&config, 7);
        assert_eq!(paths.input, PathBuf::from("in/0007.txt"));
        assert_eq!(paths.output, PathBuf::from("out/0007.txt"));
        assert_eq!(trial_file_name(1234), "1234.txt");
    }

    #[test]
    fn stderr_tail_keeps_last_non_blank_lines() {
        let text = "a\nb\n\nc\nd\ne\nf\n\n";
        assert_eq!(stderr_tail(text), "b\nc\nd\ne\nf");
        assert_eq!(stderr_tail(""), "(no diagnostic output)");
    }

    #[test]
    fn missing_input_names_trial() {
        let root = temp_root("missing_input");
        let config = sh_config(&root, 1, "true");
        let err = run_trial(&config, 3).expect_err("no input");
        assert_eq!(err.index(), 3);
        assert!(err.to_string().starts_with("trial 0003"), "{}", err);
        let _ = fs::remove_dir_all(root);
    }

    #[cfg(unix)]
    #[test]
    fn run_trial_parses_result_and_writes_output_file() {
        let root = temp_root("run_trial");
        write_inputs(&root, 1);
        let script = format!("printf '# turn: 1\\n%s\\n\\n' '{}' >&2", RESULT_LINE);
        let config = sh_config(&root, 1, &script);
        let record = run_trial(&config, 0).expect("trial");
        assert_eq!(record.index, 0);
        assert_eq!(record.n, 40);
        assert_eq!(record.t, 8050);
        assert_eq!(record.score, 2000.0);
        assert!(record.elapsed_secs >= 0.0);
        let output = fs::read_to_string(root.join("out").join("0000.txt")).expect("output");
        assert_eq!(output, "0\n");
        let _ = fs::remove_dir_all(root);
    }

    #[cfg(unix)]
    #[test]
    fn malformed_json_fails_with_trial_index() {
        let root = temp_root("bad_json");
        write_inputs(&root, 3);
        let config = sh_config(&root, 3, "printf '{\"N\": 40,\\n\\n' >&2");
        let err = run_trial(&config, 2).expect_err("bad json");
        assert_eq!(err.index(), 2);
        assert_eq!(err.code(), "result_line_invalid");
        assert!(err.to_string().contains("trial 0002"), "{}", err);
        let _ = fs::remove_dir_all(root);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_reported_with_stderr_tail() {
        let root = temp_root("exit_code");
        write_inputs(&root, 1);
        let config = sh_config(&root, 1, "echo 'thread main panicked' >&2; exit 101");
        let err = run_trial(&config, 0).expect_err("nonzero exit");
        match &err {
            TrialError::SolverFailed {
                index,
                status,
                stderr_tail,
            } => {
                assert_eq!(*index, 0);
                assert_eq!(status, "101");
                assert!(stderr_tail.contains("panicked"));
            }
            other => panic!("unexpected error: {}", other),
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_solver_binary_is_a_spawn_error() {
        let root = temp_root("spawn");
        write_inputs(&root, 1);
        let mut config = sh_config(&root, 1, "true");
        config.solver = vec![root.join("no_such_solver").display().to_string()];
        let err = run_trial(&config, 0).expect_err("spawn");
        assert_eq!(err.code(), "solver_spawn_failed");
        assert_eq!(err.index(), 0);
        let _ = fs::remove_dir_all(root);
    }
}
