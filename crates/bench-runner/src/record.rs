use serde::{Deserialize, Serialize};

/// Metrics the solver reports on its result line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverResult {
    #[serde(rename = "N")]
    pub n: u64,
    #[serde(rename = "T")]
    pub t: u64,
    #[serde(rename = "S")]
    pub s: f64,
    #[serde(rename = "estimated score")]
    pub estimated_score: f64,
    pub score: f64,
    #[serde(rename = "real score")]
    pub real_score: f64,
}

/// One row of the report: a solver result tagged with its trial index and
/// the wall-clock time of the invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialRecord {
    pub index: usize,
    pub n: u64,
    pub t: u64,
    pub s: f64,
    pub estimated_score: f64,
    pub score: f64,
    pub real_score: f64,
    pub elapsed_secs: f64,
}

impl TrialRecord {
    pub fn new(index: usize, result: SolverResult, elapsed_secs: f64) -> Self {
        Self {
            index,
            n: result.n,
            t: result.t,
            s: result.s,
            estimated_score: result.estimated_score,
            score: result.score,
            real_score: result.real_score,
            elapsed_secs: round_secs(elapsed_secs),
        }
    }
}

/// Rounds a duration to 4 decimal places, the precision kept in the report.
pub fn round_secs(secs: f64) -> f64 {
    (secs * 10_000.0).round() / 10_000.0
}
