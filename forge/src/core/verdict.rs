//! Parsing of structured verdicts returned by the vision oracle.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static ANSWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<answer>\s*(yes|no)\s*</answer>").expect("answer regex"));
static REASON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<reason>\s*(.*?)\s*</reason>").expect("reason regex"));

/// Pass/fail judgement with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub reason: String,
}

impl Verdict {
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// Parse `<answer>yes|no</answer>` and an optional `<reason>...</reason>`.
///
/// Tags are matched case-insensitively and may span lines. A missing reason
/// falls back to the whole trimmed response. A response without an answer tag
/// is malformed and yields a failing verdict that quotes the raw text.
pub fn parse_verdict(response: &str) -> Verdict {
    let Some(answer) = ANSWER_RE.captures(response).and_then(|c| c.get(1)) else {
        return Verdict::fail(format!(
            "Invalid vision response format: {}",
            response.trim()
        ));
    };
    let reason = REASON_RE
        .captures(response)
        .and_then(|c| c.get(1))
        .map_or_else(|| response.trim().to_string(), |m| m.as_str().to_string());
    Verdict {
        passed: answer.as_str().eq_ignore_ascii_case("yes"),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_passing_answer_with_reason() {
        let verdict = parse_verdict("<reason>Player sprite visible</reason>\n<answer>yes</answer>");
        assert!(verdict.passed);
        assert_eq!(verdict.reason, "Player sprite visible");
    }

    #[test]
    fn blank_screen_fails_with_reason() {
        let verdict = parse_verdict("<reason>blank screen</reason><answer>no</answer>");
        assert!(!verdict.passed);
        assert_eq!(verdict.reason, "blank screen");
    }

    #[test]
    fn tags_are_case_insensitive_and_whitespace_tolerant() {
        let verdict = parse_verdict("<ANSWER>\n  Yes \n</ANSWER>\n<Reason>\n ok\n</Reason>");
        assert!(verdict.passed);
        assert_eq!(verdict.reason, "ok");
    }

    #[test]
    fn missing_reason_falls_back_to_full_text() {
        let verdict = parse_verdict("  <answer>no</answer> nothing rendered  ");
        assert!(!verdict.passed);
        assert_eq!(verdict.reason, "<answer>no</answer> nothing rendered");
    }

    #[test]
    fn missing_answer_is_a_failure() {
        let verdict = parse_verdict("looks fine to me");
        assert!(!verdict.passed);
        assert_eq!(verdict.reason, "Invalid vision response format: looks fine to me");
    }

    #[test]
    fn answer_other_than_yes_or_no_is_malformed() {
        let verdict = parse_verdict("<answer>maybe</answer>");
        assert!(!verdict.passed);
        assert!(verdict.reason.starts_with("Invalid vision response format:"));
    }
}
