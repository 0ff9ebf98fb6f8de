use crate::record::SolverResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where the solver's JSON result line sits in its diagnostic output.
///
/// In config files this is either `second_to_last` or `{marker: "<prefix>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RuleRepr", into = "RuleRepr")]
pub enum ResultLineRule {
    /// The line before the trailer's final line break. The diagnostic stream
    /// may end with `{json}\n` or `{json}\n\n`; anything else after the JSON
    /// line is taken as the result line and fails to decode.
    #[default]
    SecondToLast,
    /// The last line starting with the given prefix, prefix stripped.
    Marker(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RuleRepr {
    Name(String),
    Marker { marker: String },
}

impl TryFrom<RuleRepr> for ResultLineRule {
    type Error = String;

    fn try_from(repr: RuleRepr) -> Result<Self, Self::Error> {
        match repr {
            RuleRepr::Name(name) if name == "second_to_last" => Ok(ResultLineRule::SecondToLast),
            RuleRepr::Name(name) => Err(format!(
                "unknown result_line rule `{}` (expected `second_to_last` or `{{marker: ...}}`)",
                name
            )),
            RuleRepr::Marker { marker } if marker.is_empty() => {
                Err("result_line marker must not be empty".to_string())
            }
            RuleRepr::Marker { marker } => Ok(ResultLineRule::Marker(marker)),
        }
    }
}

impl From<ResultLineRule> for RuleRepr {
    fn from(rule: ResultLineRule) -> Self {
        match rule {
            ResultLineRule::SecondToLast => RuleRepr::Name("second_to_last".to_string()),
            ResultLineRule::Marker(marker) => RuleRepr::Marker { marker },
        }
    }
}

impl ResultLineRule {
    pub fn as_str(&self) -> &str {
        match self {
            ResultLineRule::SecondToLast => "second_to_last",
            ResultLineRule::Marker(_) => "marker",
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("diagnostic output is empty")]
    Empty,
    #[error("result line is blank (expected JSON on line {line_no} of {line_count})")]
    BlankResultLine { line_no: usize, line_count: usize },
    #[error("no diagnostic line starts with marker `{marker}`")]
    MarkerNotFound { marker: String },
    #[error("result line is not a valid result record: {source}; line: {line}")]
    InvalidJson {
        line: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Splits diagnostic text into lines. The empty remainder after a final line
/// break is not a line; `\r` before a break is dropped.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// Picks the raw result line out of the diagnostic text.
pub fn select_result_line<'a>(text: &'a str, rule: &ResultLineRule) -> Result<&'a str, ParseError> {
    let mut lines = split_lines(text);
    if lines.is_empty() {
        return Err(ParseError::Empty);
    }
    match rule {
        ResultLineRule::SecondToLast => {
            let line_count = lines.len();
            if lines.len() > 1 && lines.last().is_some_and(|l| l.trim().is_empty()) {
                lines.pop();
            }
            let line = lines.last().copied().unwrap_or_default();
            if line.trim().is_empty() {
                return Err(ParseError::BlankResultLine {
                    line_no: lines.len(),
                    line_count,
                });
            }
            Ok(line.trim())
        }
        ResultLineRule::Marker(marker) => lines
            .iter()
            .rev()
            .copied()
            .find_map(|l| l.trim_start().strip_prefix(marker.as_str()))
            .map(str::trim)
            .ok_or_else(|| ParseError::MarkerNotFound {
                marker: marker.clone(),
            }),
    }
}

/// Extracts and decodes the solver's result record from its diagnostic text.
pub fn parse_result_line(text: &str, rule: &ResultLineRule) -> Result<SolverResult, ParseError> {
    let line = select_result_line(text, rule)?;
    serde_json::from_str(line).map_err(|source| ParseError::InvalidJson {
        line: line.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT: &str =
        r#"{"N":40,"T":8050,"S":1.0,"estimated score":1000,"score":2000,"real score":1900}"#;

    #[test]
    fn second_to_last_skips_single_trailing_blank_line() {
        let text = format!("# turn: 1\n# turn: 2\n{}\n\n", RESULT);
        let line = select_result_line(&text, &ResultLineRule::SecondToLast).expect("line");
        assert_eq!(line, RESULT);
        let parsed = parse_result_line(&text, &ResultLineRule::SecondToLast).expect("parse");
        assert_eq!(parsed.score, 2000.0);
    }

    #[test]
    fn second_to_last_matches_plain_eprintln_trailer() {
        let text = "i: 0\ni: 1\n{ \"N\": 40, \"T\": 8050, \"S\": 1, \"estimated score\": 10, \"score\": 20, \"real score\": 19 }\n";
        let parsed = parse_result_line(text, &ResultLineRule::SecondToLast).expect("parse");
        assert_eq!(parsed.n, 40);
        assert_eq!(parsed.real_score, 19.0);
    }

    #[test]
    fn crlf_line_breaks_are_accepted() {
        let text = format!("noise\r\n{}\r\n\r\n", RESULT);
        let parsed = parse_result_line(&text, &ResultLineRule::SecondToLast).expect("parse");
        assert_eq!(parsed.t, 8050);
    }

    #[test]
    fn trailing_warning_is_not_silently_skipped() {
        let text = format!("{}\nwarning: slow\n", RESULT);
        let err = parse_result_line(&text, &ResultLineRule::SecondToLast).expect_err("warning");
        match err {
            ParseError::InvalidJson { line, .. } => assert_eq!(line, "warning: slow"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn two_trailing_blank_lines_are_rejected() {
        let text = format!("{}\n\n\n", RESULT);
        let err = select_result_line(&text, &ResultLineRule::SecondToLast).expect_err("blank");
        assert!(matches!(err, ParseError::BlankResultLine { .. }), "{}", err);
    }

    #[test]
    fn empty_output_is_an_error() {
        assert!(matches!(
            select_result_line("", &ResultLineRule::SecondToLast),
            Err(ParseError::Empty)
        ));
        assert!(matches!(
            select_result_line("\n", &ResultLineRule::SecondToLast),
            Err(ParseError::BlankResultLine { .. })
        ));
    }

    #[test]
    fn marker_rule_takes_last_marked_line() {
        let text = format!(
            "RESULT {{\"N\":1,\"T\":1,\"S\":1,\"estimated score\":1,\"score\":1,\"real score\":1}}\nRESULT {}\ntrailing warning\n",
            RESULT
        );
        let rule = ResultLineRule::Marker("RESULT ".to_string());
        let parsed = parse_result_line(&text, &rule).expect("parse");
        assert_eq!(parsed.n, 40);
    }

    #[test]
    fn marker_rule_reports_missing_marker() {
        let rule = ResultLineRule::Marker("RESULT ".to_string());
        let err = parse_result_line(RESULT, &rule).expect_err("no marker");
        assert!(err.to_string().contains("RESULT"), "{}", err);
    }

    #[test]
    fn rule_serializes_as_name_or_marker_map() {
        assert_eq!(
            serde_json::to_value(ResultLineRule::SecondToLast).expect("encode"),
            serde_json::json!("second_to_last")
        );
        let marker = ResultLineRule::Marker("RESULT ".to_string());
        let encoded = serde_json::to_value(&marker).expect("encode");
        assert_eq!(encoded, serde_json::json!({"marker": "RESULT "}));
        let decoded: ResultLineRule = serde_json::from_value(encoded).expect("decode");
        assert_eq!(decoded, marker);
    }

    #[test]
    fn rule_rejects_unknown_name_and_empty_marker() {
        let err = serde_json::from_str::<ResultLineRule>("\"last\"").expect_err("unknown");
        assert!(err.to_string().contains("unknown result_line rule"), "{}", err);
        let err = serde_json::from_str::<ResultLineRule>(r#"{"marker":""}"#).expect_err("empty");
        assert!(err.to_string().contains("must not be empty"), "{}", err);
    }

    #[test]
    fn malformed_json_keeps_offending_line() {
        let text = "# log\n{\"N\": 40, \"T\":\n\n";
        let err = parse_result_line(text, &ResultLineRule::SecondToLast).expect_err("bad json");
        assert!(err.to_string().contains("{\"N\": 40, \"T\":"), "{}", err);
    }
}
