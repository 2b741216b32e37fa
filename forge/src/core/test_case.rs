//! Discovery and parsing of numbered test-case files.

use std::sync::LazyLock;

use jsonschema::{Validator, validator_for};
use regex::Regex;
use serde_json::Value;

const TEST_CASE_SCHEMA: &str = include_str!("../../schemas/test_case.schema.json");

static CASE_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^test_case_(\d+)\.json$").expect("case file regex"));
static CASE_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(TEST_CASE_SCHEMA).expect("test case schema is json");
    validator_for(&schema).expect("test case schema compiles")
});

/// Glob used to list candidate test-case files at the workspace root.
pub const CASE_GLOB: &str = "test_case_*.json";

/// A discovered test-case file at the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseFile {
    pub number: u32,
    /// File name, e.g. `test_case_2.json`.
    pub file_name: String,
}

impl CaseFile {
    /// Display name used in failure messages, e.g. `test_case_2`.
    pub fn name(&self) -> String {
        format!("test_case_{}", self.number)
    }
}

/// A parsed test case ready to be loaded into the running game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub expected_output: String,
    /// Raw JSON text, passed through to the game unmodified.
    pub payload: String,
}

/// Select root-level `test_case_<n>.json` files with `1 <= n <= max`, in numeric order.
pub fn select_cases<'a>(paths: impl IntoIterator<Item = &'a str>, max: usize) -> Vec<CaseFile> {
    let mut cases: Vec<CaseFile> = paths
        .into_iter()
        .filter_map(|path| {
            let number: u32 = CASE_FILE_RE.captures(path)?.get(1)?.as_str().parse().ok()?;
            let in_range = number >= 1 && usize::try_from(number).is_ok_and(|n| n <= max);
            in_range.then(|| CaseFile {
                number,
                file_name: path.to_string(),
            })
        })
        .collect();
    cases.sort_by_key(|case| case.number);
    cases.dedup_by_key(|case| case.number);
    cases
}

/// Parse a test-case payload. Errors are failure messages prefixed with the case name.
pub fn parse_case(case: &CaseFile, raw: &str) -> Result<TestCase, String> {
    let name = case.name();
    let value: Value =
        serde_json::from_str(raw).map_err(|err| format!("{name}: Invalid JSON in test case: {err}"))?;
    if value.is_object() && value.get("expectedOutput").is_none() {
        return Err(format!(
            "{name}: Missing 'expectedOutput' field in test case JSON"
        ));
    }
    let messages: Vec<String> = CASE_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(format!("{name}: Invalid test case: {}", messages.join("; ")));
    }
    let expected_output = value
        .get("expectedOutput")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(TestCase {
        name,
        expected_output,
        payload: raw.to_string(),
    })
}
