//! Build stage: type check, build, and assemble the output directory.

use anyhow::Result;
use tracing::{debug, instrument};

use crate::core::machine::Stage;
use crate::core::test_case::{CASE_GLOB, select_cases};
use crate::io::config::{BuildConfig, TestCaseConfig};
use crate::validate::{Outcome, ValidationResult, conclude, excerpt};
use crate::workspace::{ExecOutput, Workspace};

/// Type check, clear stale output, build, then copy metadata files and test
/// cases into the output dir and canonicalize the single rendered entry point.
#[instrument(skip_all, fields(retry_count))]
pub fn validate_build(
    workspace: &Workspace,
    build: &BuildConfig,
    cases: &TestCaseConfig,
    retry_count: u32,
) -> ValidationResult {
    conclude(Stage::Build, run_build(workspace, build, cases), retry_count)
}

fn run_build(workspace: &Workspace, build: &BuildConfig, cases: &TestCaseConfig) -> Result<Outcome> {
    let (ws, check) = workspace.exec(&build.check_command)?;
    if !check.success() {
        return Ok(type_check_failed(&check));
    }

    let out_dir = build.output_dir.trim_end_matches('/');
    let ws = if ws.entries(out_dir).is_empty() {
        ws
    } else {
        debug!(out_dir, "clearing stale build output");
        ws.delete_forced(out_dir)?
    };

    let (mut ws, built) = ws.exec(&build.build_command)?;
    if !built.success() {
        return Ok(build_failed(&built));
    }

    for name in &build.metadata_files {
        let Ok(content) = ws.read_bytes(name).map(<[u8]>::to_vec) else {
            return Ok(Outcome::fail(
                format!(
                    "Build validation failed: required file '{name}' is missing from the workspace root.\n\nCreate {name} and call complete again."
                ),
                format!("Missing required file: {name}"),
            ));
        };
        ws = ws.write_forced(&format!("{out_dir}/{name}"), content)?;
    }

    let listed = ws.list(CASE_GLOB);
    let case_files = select_cases(listed.iter().map(String::as_str), cases.max_cases);
    if case_files.is_empty() {
        return Ok(Outcome::fail(
            format!(
                "No test cases found\n\nCreate between 1 and {max} test cases (test_case_1.json through test_case_{max}.json) at the workspace root. They are required to validate the game.",
                max = cases.max_cases
            ),
            "No test cases found",
        ));
    }
    for case in &case_files {
        let content = ws.read_bytes(&case.file_name)?.to_vec();
        ws = ws.write_forced(&format!("{out_dir}/{}", case.file_name), content)?;
    }
    debug!(copied = case_files.len(), "copied test cases");

    let suffix = format!(".{}", build.entry_extension);
    let rendered: Vec<String> = ws
        .entries(out_dir)
        .into_iter()
        .filter(|entry| !entry.ends_with('/') && entry.ends_with(&suffix))
        .collect();
    let [entry] = rendered.as_slice() else {
        let ext = build.entry_extension.to_uppercase();
        return Ok(Outcome::fail(
            format!(
                "Expected 1 {ext} file in {out_dir}/, found {}: [{}]\n\nThe build must produce exactly one bundled {ext} file at the top of {out_dir}/.",
                rendered.len(),
                rendered.join(", ")
            ),
            format!("Build produced {} {ext} files, expected 1", rendered.len()),
        ));
    };

    if *entry != build.entry_name {
        let content = ws.read_bytes(&format!("{out_dir}/{entry}"))?.to_vec();
        ws = ws.write_forced(&format!("{out_dir}/{}", build.entry_name), content)?;
    }
    Ok(Outcome::Pass(Some(ws)))
}

fn type_check_failed(output: &ExecOutput) -> Outcome {
    let report = combined(output);
    Outcome::fail(
        format!(
            "Type check failed\n\nType errors:\n{report}\n\nFix the type errors above (wrong or missing types, missing properties, mismatched assignments) and call complete again."
        ),
        format!("Type check failed: {}", excerpt(&report, 200)),
    )
}

fn build_failed(output: &ExecOutput) -> Outcome {
    let report = combined(output);
    Outcome::fail(
        format!(
            "Build failed\n\nBuild errors:\n{report}\n\nFix the errors above (bad imports, syntax errors, asset loading) and call complete again."
        ),
        format!("Build failed: {}", excerpt(&report, 200)),
    )
}

/// Raw tool output, stdout first. Type checkers report on stdout, bundlers on stderr.
fn combined(output: &ExecOutput) -> String {
    [output.stdout.trim(), output.stderr.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedSandbox, SandboxStep, scripted_workspace};

    fn game_files() -> Vec<(&'static str, &'static str)> {
        vec![
            ("src/index.ts", "start()"),
            ("config.json", "{}"),
            ("MANIFEST.json", "{\"version\":\"1.0\"}"),
            ("test_case_1.json", "{\"expectedOutput\":\"a\"}"),
            ("test_case_2.json", "{\"expectedOutput\":\"b\"}"),
        ]
    }

    fn run(sandbox: &ScriptedSandbox, files: &[(&str, &str)]) -> ValidationResult {
        let ws = scripted_workspace(files, sandbox);
        validate_build(&ws, &BuildConfig::default(), &TestCaseConfig::default(), 0)
    }

    #[test]
    fn single_html_is_copied_to_index() {
        let sandbox = ScriptedSandbox::new([
            SandboxStep::ok(),
            SandboxStep::ok().writes(&[("dist/Game_Preview.html", "<html>")]),
        ]);
        let result = run(&sandbox, &game_files());
        assert!(result.passed, "{:?}", result.feedback);
        let ws = result.workspace.expect("workspace");
        assert_eq!(ws.read("dist/index.html").unwrap(), "<html>");
        assert_eq!(ws.read("dist/MANIFEST.json").unwrap(), "{\"version\":\"1.0\"}");
        assert!(ws.exists("dist/test_case_1.json"));
        assert!(ws.exists("dist/test_case_2.json"));
        assert_eq!(
            sandbox.commands(),
            vec!["npx tsc --noEmit".to_string(), "npm run build".to_string()]
        );
        sandbox.assert_drained().expect("sandbox drained");
    }

    #[test]
    fn zero_html_files_fail() {
        let sandbox = ScriptedSandbox::new([
            SandboxStep::ok(),
            SandboxStep::ok().writes(&[("dist/app.js", "x")]),
        ]);
        let result = run(&sandbox, &game_files());
        assert!(!result.passed);
        assert_eq!(result.retry_count, 1);
        assert!(result.feedback.unwrap().starts_with("Expected 1 HTML file in dist/, found 0"));
    }

    #[test]
    fn two_html_files_fail() {
        let sandbox = ScriptedSandbox::new([
            SandboxStep::ok(),
            SandboxStep::ok().writes(&[("dist/a.html", "a"), ("dist/b.html", "b")]),
        ]);
        let result = run(&sandbox, &game_files());
        assert!(!result.passed);
        assert_eq!(result.failures, vec!["Build produced 2 HTML files, expected 1".to_string()]);
    }

    #[test]
    fn type_errors_stop_before_build() {
        let sandbox = ScriptedSandbox::new([SandboxStep::exit(2, "src/index.ts(1,1): error TS2304", "")]);
        let result = run(&sandbox, &game_files());
        assert!(!result.passed);
        assert!(result.feedback.unwrap().contains("error TS2304"));
        assert_eq!(sandbox.commands().len(), 1);
    }

    #[test]
    fn build_failure_carries_stderr() {
        let sandbox = ScriptedSandbox::new([
            SandboxStep::ok(),
            SandboxStep::exit(1, "", "Could not resolve './Game'"),
        ]);
        let result = run(&sandbox, &game_files());
        assert!(!result.passed);
        assert!(result.feedback.unwrap().contains("Could not resolve './Game'"));
    }

    #[test]
    fn missing_test_cases_fail_after_build() {
        let sandbox = ScriptedSandbox::new([
            SandboxStep::ok(),
            SandboxStep::ok().writes(&[("dist/index.html", "<html>")]),
        ]);
        let files: Vec<_> = game_files()
            .into_iter()
            .filter(|(path, _)| !path.starts_with("test_case"))
            .collect();
        let result = run(&sandbox, &files);
        assert!(!result.passed);
        assert_eq!(result.failures, vec!["No test cases found".to_string()]);
    }

    #[test]
    fn missing_metadata_file_fails() {
        let sandbox = ScriptedSandbox::new([
            SandboxStep::ok(),
            SandboxStep::ok().writes(&[("dist/index.html", "<html>")]),
        ]);
        let files: Vec<_> = game_files()
            .into_iter()
            .filter(|(path, _)| *path != "MANIFEST.json")
            .collect();
        let result = run(&sandbox, &files);
        assert!(!result.passed);
        assert_eq!(result.failures, vec!["Missing required file: MANIFEST.json".to_string()]);
    }

    #[test]
    fn stale_output_is_cleared_before_building() {
        let sandbox = ScriptedSandbox::new([
            SandboxStep::ok(),
            SandboxStep::ok().writes(&[("dist/new.html", "new")]),
        ]);
        let mut files = game_files();
        files.push(("dist/old.html", "old"));
        let result = run(&sandbox, &files);
        assert!(result.passed, "{:?}", result.feedback);
        let ws = result.workspace.expect("workspace");
        assert!(!ws.exists("dist/old.html"));
        assert_eq!(ws.read("dist/index.html").unwrap(), "new");
    }

    #[test]
    fn sandbox_error_is_a_counted_failure() {
        let sandbox = ScriptedSandbox::new([SandboxStep::error("container vanished")]);
        let ws = scripted_workspace(&game_files(), &sandbox);
        let result = validate_build(&ws, &BuildConfig::default(), &TestCaseConfig::default(), 3);
        assert!(!result.passed);
        assert_eq!(result.retry_count, 4);
        assert!(result.failures[0].contains("container vanished"));
    }
}
