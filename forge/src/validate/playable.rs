//! Playable stage: render the build output and ask the vision oracle whether
//! it is a working game for the request.

use anyhow::Result;
use tracing::instrument;

use crate::core::machine::Stage;
use crate::io::prompt::{TaskContext, format_console_logs, render_playable};
use crate::io::vision::judge;
use crate::validate::{Outcome, StageEnv, ValidationResult, conclude};
use crate::workspace::Workspace;

#[instrument(skip_all, fields(retry_count, feedback_mode = task.feedback_mode))]
pub fn validate_playable(
    workspace: &Workspace,
    output_dir: &str,
    env: StageEnv<'_>,
    task: TaskContext<'_>,
    retry_count: u32,
) -> ValidationResult {
    conclude(Stage::Playable, run_playable(workspace, output_dir, env, task), retry_count)
}

fn run_playable(
    workspace: &Workspace,
    output_dir: &str,
    env: StageEnv<'_>,
    task: TaskContext<'_>,
) -> Result<Outcome> {
    env.browser.reset()?;
    env.browser.load(&workspace.subtree(output_dir))?;
    let capture = env.browser.capture(None)?;
    if let Some(debug) = env.debug {
        debug.save_page_screenshot(&capture.screenshot);
    }

    let prompt = render_playable(task, &capture.console_logs)?;
    let verdict = judge(env.vision, &capture.screenshot, &prompt);
    if verdict.passed {
        return Ok(Outcome::Pass(None));
    }
    let feedback = format!(
        "Playable validation failed with the reason: {}\n\nConsole logs:\n{}",
        verdict.reason,
        format_console_logs(&capture.console_logs)
    );
    Ok(Outcome::fail(feedback, verdict.reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::browser::Capture;
    use crate::test_support::{ScriptedBrowser, ScriptedVision, detached_workspace};

    fn task() -> TaskContext<'static> {
        TaskContext {
            task: "a racing game",
            original_task: "a racing game",
            feedback_mode: false,
        }
    }

    fn built() -> Workspace {
        detached_workspace(&[("dist/index.html", "<html>"), ("src/index.ts", "")])
    }

    #[test]
    fn blank_screen_verdict_fails_with_reason_and_logs() {
        let browser = ScriptedBrowser::new([Capture {
            screenshot: b"png".to_vec(),
            console_logs: vec!["[error] Uncaught TypeError".to_string()],
            errors: Vec::new(),
        }]);
        let vision = ScriptedVision::new(["<reason>blank screen</reason><answer>no</answer>"]);
        let env = StageEnv {
            browser: &browser,
            vision: &vision,
            debug: None,
        };
        let result = validate_playable(&built(), "dist", env, task(), 0);
        assert!(!result.passed);
        assert_eq!(result.retry_count, 1);
        let feedback = result.feedback.unwrap();
        assert!(feedback.contains("blank screen"));
        assert!(feedback.contains("Console logs:\n  [error] Uncaught TypeError"));
        assert_eq!(result.failures, vec!["blank screen".to_string()]);
    }

    #[test]
    fn empty_logs_use_explicit_marker() {
        let browser = ScriptedBrowser::new([Capture::default()]);
        let vision = ScriptedVision::new(["<reason>nothing drawn</reason><answer>no</answer>"]);
        let env = StageEnv {
            browser: &browser,
            vision: &vision,
            debug: None,
        };
        let result = validate_playable(&built(), "dist", env, task(), 0);
        assert!(result.feedback.unwrap().ends_with("Console logs:\n  No console logs captured."));
    }

    #[test]
    fn passing_verdict_resets_counter_and_loads_only_output() {
        let browser = ScriptedBrowser::new([Capture::default()]);
        let vision = ScriptedVision::new(["<reason>looks good</reason><answer>yes</answer>"]);
        let env = StageEnv {
            browser: &browser,
            vision: &vision,
            debug: None,
        };
        let result = validate_playable(&built(), "dist", env, task(), 4);
        assert!(result.passed);
        assert_eq!(result.retry_count, 0);
        assert_eq!(browser.resets(), 1);
        let loaded = browser.loaded_sites();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].keys().collect::<Vec<_>>(), vec!["index.html"]);
        browser.assert_drained().expect("browser drained");
        vision.assert_drained().expect("vision drained");
    }

    #[test]
    fn feedback_mode_prompt_names_both_requests() {
        let browser = ScriptedBrowser::new([Capture::default()]);
        let vision = ScriptedVision::new(["<answer>yes</answer>"]);
        let env = StageEnv {
            browser: &browser,
            vision: &vision,
            debug: None,
        };
        let task = TaskContext {
            task: "make the car red",
            original_task: "a racing game",
            feedback_mode: true,
        };
        validate_playable(&built(), "dist", env, task, 0);
        let prompt = &vision.prompts()[0];
        assert!(prompt.contains("a racing game"));
        assert!(prompt.contains("make the car red"));
    }

    #[test]
    fn browser_failure_is_a_counted_failure() {
        let browser = ScriptedBrowser::failing("chromium exited");
        let vision = ScriptedVision::new(Vec::<String>::new());
        let env = StageEnv {
            browser: &browser,
            vision: &vision,
            debug: None,
        };
        let result = validate_playable(&built(), "dist", env, task(), 0);
        assert!(!result.passed);
        assert!(result.failures[0].contains("chromium exited"));
    }
}
