//! Three-stage validation pipeline: build, playable, test cases.
//!
//! Each stage returns a [`ValidationResult`]. A failure carries a feedback
//! message for the LLM and an incremented retry counter; a success resets the
//! counter and may carry an updated workspace. Infrastructure errors inside a
//! stage are converted to failures at the stage boundary.

pub mod build;
pub mod playable;
pub mod test_cases;

use tracing::{info, warn};

use crate::core::machine::Stage;
use crate::core::retry::RetryPolicy;
use crate::io::browser::Browser;
use crate::io::debug_log::DebugRun;
use crate::io::vision::Vision;
use crate::workspace::Workspace;

pub use build::validate_build;
pub use playable::validate_playable;
pub use test_cases::validate_test_cases;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub passed: bool,
    /// Message appended to the conversation on failure.
    pub feedback: Option<String>,
    pub failures: Vec<String>,
    /// Counter after this stage: reset on success, incremented on failure.
    pub retry_count: u32,
    /// Workspace to continue with, when the stage changed it.
    pub workspace: Option<Workspace>,
}

impl ValidationResult {
    pub fn pass(workspace: Option<Workspace>) -> Self {
        Self {
            passed: true,
            feedback: None,
            failures: Vec::new(),
            retry_count: RetryPolicy::next_count(0, true),
            workspace,
        }
    }

    pub fn fail(retry_count: u32, feedback: String, failures: Vec<String>) -> Self {
        Self {
            passed: false,
            feedback: Some(feedback),
            failures,
            retry_count: RetryPolicy::next_count(retry_count, false),
            workspace: None,
        }
    }
}

/// Collaborators shared by the browser-backed stages.
#[derive(Clone, Copy)]
pub struct StageEnv<'a> {
    pub browser: &'a dyn Browser,
    pub vision: &'a dyn Vision,
    pub debug: Option<&'a DebugRun>,
}

/// What a stage concluded when nothing went wrong underneath it.
#[derive(Debug)]
enum Outcome {
    Pass(Option<Workspace>),
    Fail {
        feedback: String,
        failures: Vec<String>,
    },
}

impl Outcome {
    fn fail(feedback: impl Into<String>, failure: impl Into<String>) -> Self {
        Outcome::Fail {
            feedback: feedback.into(),
            failures: vec![failure.into()],
        }
    }
}

/// Convert a stage's outcome, or the infrastructure error that interrupted it, into a result.
fn conclude(stage: Stage, outcome: anyhow::Result<Outcome>, retry_count: u32) -> ValidationResult {
    match outcome {
        Ok(Outcome::Pass(workspace)) => {
            info!(stage = stage.label(), "validation stage passed");
            ValidationResult::pass(workspace)
        }
        Ok(Outcome::Fail { feedback, failures }) => {
            info!(stage = stage.label(), failures = failures.len(), "validation stage failed");
            ValidationResult::fail(retry_count, feedback, failures)
        }
        Err(err) => {
            warn!(stage = stage.label(), err = %format!("{err:#}"), "validation stage errored");
            let message = format!("{} validation error: {err:#}", stage_title(stage));
            ValidationResult::fail(
                retry_count,
                format!("{message}\n\nPlease fix the issue and call complete again."),
                vec![message],
            )
        }
    }
}

fn stage_title(stage: Stage) -> &'static str {
    match stage {
        Stage::Build => "Build",
        Stage::Playable => "Playable",
        Stage::TestCases => "Test case",
    }
}

/// First `limit` characters of `text`, for compact failure summaries.
fn excerpt(text: &str, limit: usize) -> String {
    text.trim().chars().take(limit).collect()
}
