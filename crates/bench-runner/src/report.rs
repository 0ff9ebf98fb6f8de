use crate::record::TrialRecord;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const REPORT_HEADER: &str = "i,N,T,S,estimated score,score,real score,time";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("no trial results to aggregate (trial count is 0)")]
    EmptyBatch,
    #[error("failed to {action} report {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}:{line}: {message}", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// Mean and batch total of one score variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreStat {
    pub mean: f64,
    pub total: f64,
}

impl ScoreStat {
    fn over(values: impl Iterator<Item = f64>, count: usize) -> Self {
        let mean = values.sum::<f64>() / count as f64;
        Self {
            mean,
            total: mean * count as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub trials: usize,
    pub score: ScoreStat,
    pub estimated_score: ScoreStat,
    pub real_score: ScoreStat,
}

impl Summary {
    pub fn from_records(records: &[TrialRecord]) -> Result<Self, ReportError> {
        let count = records.len();
        if count == 0 {
            return Err(ReportError::EmptyBatch);
        }
        Ok(Self {
            trials: count,
            score: ScoreStat::over(records.iter().map(|r| r.score), count),
            estimated_score: ScoreStat::over(records.iter().map(|r| r.estimated_score), count),
            real_score: ScoreStat::over(records.iter().map(|r| r.real_score), count),
        })
    }

    /// Console lines: judge score first, then estimated and real score.
    pub fn lines(&self) -> Vec<String> {
        let line = |label: &str, stat: &ScoreStat| {
            format!(
                "{}: {}, score mean: {}",
                label,
                format_thousands(stat.total),
                format_thousands(stat.mean)
            )
        };
        vec![
            line("judge score", &self.score),
            line("estimated_score", &self.estimated_score),
            line("real_score", &self.real_score),
        ]
    }
}

/// Truncates toward zero and groups digits by three: `1234567.9` -> `1,234,567`.
pub fn format_thousands(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let truncated = value.trunc();
    let digits = format!("{:.0}", truncated.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if truncated < 0.0 {
        grouped.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

/// Floats use the shortest text that parses back to the same value, so an
/// integral `S` is written as `1`, the same text the solver itself prints.
fn render_row(r: &TrialRecord) -> String {
    format!(
        "{},{},{},{},{},{},{},{}",
        r.index, r.n, r.t, r.s, r.estimated_score, r.score, r.real_score, r.elapsed_secs
    )
}

pub fn render_report(records: &[TrialRecord]) -> String {
    let mut out = String::with_capacity(REPORT_HEADER.len() + 1 + records.len() * 48);
    out.push_str(REPORT_HEADER);
    out.push('\n');
    for record in records {
        out.push_str(&render_row(record));
        out.push('\n');
    }
    out
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(".tmp.{}", std::process::id()));
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Writes the records as a CSV table with a header row.
pub fn write_report(path: &Path, records: &[TrialRecord]) -> Result<(), ReportError> {
    atomic_write_bytes(path, render_report(records).as_bytes()).map_err(|source| ReportError::Io {
        action: "write",
        path: path.to_path_buf(),
        source,
    })
}

fn parse_field<T: std::str::FromStr>(
    path: &Path,
    line: usize,
    name: &str,
    raw: &str,
) -> Result<T, ReportError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ReportError::Malformed {
        path: path.to_path_buf(),
        line,
        message: format!("column `{}`: {} ({:?})", name, e, raw),
    })
}

pub fn parse_report(path: &Path, text: &str) -> Result<Vec<TrialRecord>, ReportError> {
    let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    match lines.next() {
        Some((_, header)) if header.trim() == REPORT_HEADER => {}
        Some((idx, header)) => {
            return Err(ReportError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
                message: format!("unexpected header {:?}", header),
            })
        }
        None => {
            return Err(ReportError::Malformed {
                path: path.to_path_buf(),
                line: 1,
                message: "missing header".to_string(),
            })
        }
    }

    let mut records = Vec::new();
    for (idx, row) in lines {
        let line = idx + 1;
        let cols: Vec<&str> = row.split(',').collect();
        if cols.len() != 8 {
            return Err(ReportError::Malformed {
                path: path.to_path_buf(),
                line,
                message: format!("expected 8 columns, found {}", cols.len()),
            });
        }
        records.push(TrialRecord {
            index: parse_field(path, line, "i", cols[0])?,
            n: parse_field(path, line, "N", cols[1])?,
            t: parse_field(path, line, "T", cols[2])?,
            s: parse_field(path, line, "S", cols[3])?,
            estimated_score: parse_field(path, line, "estimated score", cols[4])?,
            score: parse_field(path, line, "score", cols[5])?,
            real_score: parse_field(path, line, "real score", cols[6])?,
            elapsed_secs: parse_field(path, line, "time", cols[7])?,
        });
    }
    Ok(records)
}

/// Reads a report written by [`write_report`].
pub fn read_report(path: &Path) -> Result<Vec<TrialRecord>, ReportError> {
    let text = fs::read_to_string(path).map_err(|source| ReportError::Io {
        action: "read",
        path: path.to_path_buf(),
        source,
    })?;
    parse_report(path, &text)
}
