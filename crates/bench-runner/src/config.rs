use crate::parse::ResultLineRule;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_TRIALS: usize = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("solver command is empty (set `solver` in the config file or pass it after `--`)")]
    MissingSolver,
    #[error("workers must be at least 1")]
    ZeroWorkers,
}

/// Everything a batch needs; passed explicitly into [`crate::run_batch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    pub trials: usize,
    /// Program followed by its arguments. Never passed through a shell.
    pub solver: Vec<String>,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub report_path: PathBuf,
    /// `None` means one worker per available core.
    pub workers: Option<usize>,
    pub result_line: ResultLineRule,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            trials: DEFAULT_TRIALS,
            solver: Vec::new(),
            input_dir: PathBuf::from("in"),
            output_dir: PathBuf::from("out"),
            report_path: PathBuf::from("result.csv"),
            workers: None,
            result_line: ResultLineRule::SecondToLast,
        }
    }
}

/// Values set on the command line; each `Some` replaces the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub trials: Option<usize>,
    pub solver: Option<Vec<String>>,
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub workers: Option<usize>,
    pub result_line: Option<ResultLineRule>,
}

impl BenchConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: BenchConfig = serde_yaml::from_str(raw)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Loads the optional config file, then layers the command-line values on top.
    pub fn resolve(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(v) = overrides.trials {
            self.trials = v;
        }
        if let Some(v) = overrides.solver.filter(|s| !s.is_empty()) {
            self.solver = v;
        }
        if let Some(v) = overrides.input_dir {
            self.input_dir = v;
        }
        if let Some(v) = overrides.output_dir {
            self.output_dir = v;
        }
        if let Some(v) = overrides.report_path {
            self.report_path = v;
        }
        if let Some(v) = overrides.workers {
            self.workers = Some(v);
        }
        if let Some(v) = overrides.result_line {
            self.result_line = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.solver.first().map_or(true, |p| p.trim().is_empty()) {
            return Err(ConfigError::MissingSolver);
        }
        if self.workers == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }

    /// Worker count actually used: the configured value or the core count,
    /// never more than there are trials.
    pub fn effective_workers(&self) -> usize {
        let requested = self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        requested.clamp(1, self.trials.max(1))
    }
}
