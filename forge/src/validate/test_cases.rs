//! Test-case stage: load each numbered test case into the game and have the
//! vision oracle compare the frozen frame with its expected output.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::machine::Stage;
use crate::core::test_case::{CASE_GLOB, CaseFile, parse_case, select_cases};
use crate::core::types::FileTree;
use crate::io::config::TestCaseConfig;
use crate::io::prompt::render_test_case;
use crate::io::vision::judge;
use crate::validate::{Outcome, StageEnv, ValidationResult, conclude};
use crate::workspace::Workspace;

/// Run test cases in ascending numeric order and stop at the first failure.
///
/// When every case passes, the case files are moved from the workspace root
/// into the configured debug directory.
#[instrument(skip_all, fields(retry_count))]
pub fn validate_test_cases(
    workspace: &Workspace,
    output_dir: &str,
    cases: &TestCaseConfig,
    env: StageEnv<'_>,
    retry_count: u32,
) -> ValidationResult {
    conclude(
        Stage::TestCases,
        run_cases(workspace, output_dir, cases, env),
        retry_count,
    )
}

fn run_cases(
    workspace: &Workspace,
    output_dir: &str,
    config: &TestCaseConfig,
    env: StageEnv<'_>,
) -> Result<Outcome> {
    let listed = workspace.list(CASE_GLOB);
    let files = select_cases(listed.iter().map(String::as_str), config.max_cases);
    if files.is_empty() {
        let max = config.max_cases;
        return Ok(Outcome::fail(
            format!(
                "Test case validation failed: No test cases found. You must create 1-{max} test cases at the ROOT level (test_case_1.json through test_case_{max}.json)."
            ),
            format!("Missing test cases (required: 1-{max})"),
        ));
    }
    if listed.len() > files.len() {
        debug!(found = listed.len(), used = files.len(), "ignoring extra test case files");
    }

    let site = workspace.subtree(output_dir);
    for case in &files {
        let failure = match run_case(workspace, &site, case, env) {
            Ok(None) => {
                info!(case = %case.name(), "test case passed");
                continue;
            }
            Ok(Some(failure)) => failure,
            Err(err) => format!("{}: Error running test case: {err:#}", case.name()),
        };
        if let Some(debug) = env.debug {
            debug.save_case_error(&case.name(), &failure);
        }
        return Ok(Outcome::fail(
            format!("Test case validation failed: {failure}\n\nPlease fix the issues and update the test case if needed."),
            failure,
        ));
    }

    let relocated = relocate(workspace, &files, &config.debug_dir);
    Ok(Outcome::Pass(Some(relocated)))
}

/// Run one case. `Ok(Some(message))` is a test failure; `Err` is an infrastructure error.
fn run_case(
    workspace: &Workspace,
    site: &FileTree,
    case: &CaseFile,
    env: StageEnv<'_>,
) -> Result<Option<String>> {
    let name = case.name();
    let raw = workspace.read(&case.file_name)?;
    let parsed = match parse_case(case, &raw) {
        Ok(parsed) => parsed,
        Err(message) => return Ok(Some(message)),
    };

    env.browser.reset()?;
    env.browser.load(site)?;
    let capture = env.browser.capture(Some(&parsed.payload))?;
    if let Some(debug) = env.debug {
        debug.save_case_screenshot(&name, &capture.screenshot);
        debug.save_case_payload(&name, &parsed.payload);
    }
    if !capture.errors.is_empty() {
        return Ok(Some(format!("{name}: {}", capture.errors.join(", "))));
    }

    let prompt = render_test_case(&parsed.expected_output)?;
    let verdict = judge(env.vision, &capture.screenshot, &prompt);
    if verdict.passed {
        return Ok(None);
    }
    Ok(Some(format!(
        "{name} failed: Expected '{}' but vision oracle observed '{}'",
        parsed.expected_output, verdict.reason
    )))
}

/// Move passing case files under `debug_dir`. Per-file failures are logged and skipped.
fn relocate(workspace: &Workspace, files: &[CaseFile], debug_dir: &str) -> Workspace {
    let mut ws = workspace.clone();
    for case in files {
        let target = format!("{}/{}", debug_dir.trim_end_matches('/'), case.file_name);
        let moved = ws
            .read_bytes(&case.file_name)
            .map(<[u8]>::to_vec)
            .and_then(|content| ws.write_forced(&target, content))
            .and_then(|next| next.delete_forced(&case.file_name));
        match moved {
            Ok(next) => ws = next,
            Err(err) => warn!(case = %case.file_name, err = %err, "failed to move test case"),
        }
    }
    ws
}
