//! Vision oracle: judges screenshots against a prompt.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{instrument, warn};

use crate::core::verdict::{Verdict, parse_verdict};
use crate::io::process::CheckedCommand;

pub trait Vision {
    /// Ask about a PNG screenshot. Returns the raw free-text answer.
    fn ask(&self, screenshot: &[u8], prompt: &str) -> Result<String>;
}

/// Ask the oracle and parse its answer into a verdict.
///
/// A failed oracle call is a failing verdict, not an error.
#[instrument(skip_all, fields(screenshot_bytes = screenshot.len()))]
pub fn judge(vision: &dyn Vision, screenshot: &[u8], prompt: &str) -> Verdict {
    match vision.ask(screenshot, prompt) {
        Ok(text) => parse_verdict(&text),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "vision oracle call failed");
            Verdict::fail(format!("Vision validation error: {err:#}"))
        }
    }
}

/// Vision oracle backed by an external command.
///
/// The screenshot is written to `scratch_dir/screenshot.png`, its path is
/// appended as the last argument, and the prompt is sent on stdin.
#[derive(Debug, Clone)]
pub struct CommandVision {
    command: CheckedCommand,
    scratch_dir: PathBuf,
}

impl CommandVision {
    pub fn new(command: CheckedCommand, scratch_dir: PathBuf) -> Self {
        Self {
            command,
            scratch_dir,
        }
    }
}

impl Vision for CommandVision {
    fn ask(&self, screenshot: &[u8], prompt: &str) -> Result<String> {
        fs::create_dir_all(&self.scratch_dir)
            .with_context(|| format!("create directory {}", self.scratch_dir.display()))?;
        let image_path = self.scratch_dir.join("screenshot.png");
        fs::write(&image_path, screenshot)
            .with_context(|| format!("write {}", image_path.display()))?;
        let output = self
            .command
            .run(&[image_path.as_os_str()], Some(prompt.as_bytes()), None)
            .context("invoke vision oracle")?;
        Ok(output.stdout_lossy().trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedVision;

    #[test]
    fn judge_parses_oracle_answer() {
        let vision = ScriptedVision::new(["<reason>blank screen</reason><answer>no</answer>"]);
        let verdict = judge(&vision, b"png", "is it playable?");
        assert!(!verdict.passed);
        assert_eq!(verdict.reason, "blank screen");
        assert_eq!(vision.prompts(), vec!["is it playable?".to_string()]);
    }

    #[test]
    fn judge_turns_oracle_error_into_failure() {
        let vision = ScriptedVision::failing("connection reset");
        let verdict = judge(&vision, b"png", "prompt");
        assert!(!verdict.passed);
        assert!(verdict.reason.contains("connection reset"));
    }

    #[cfg(unix)]
    #[test]
    fn command_vision_passes_image_path_and_prompt() {
        let temp = tempfile::tempdir().expect("tempdir");
        // Echo the prompt back and prove the image path exists.
        let script = r#"test -f "$0" && cat"#;
        let vision = CommandVision::new(
            CheckedCommand::new(
                vec!["sh".to_string(), "-c".to_string(), script.to_string()],
                std::time::Duration::from_secs(10),
                10_000,
            ),
            temp.path().join("vision"),
        );
        let answer = vision.ask(b"png", "<answer>yes</answer>").expect("ask");
        assert_eq!(answer, "<answer>yes</answer>");
    }
}
