//! Prompt rendering for the LLM and vision oracles.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::io::config::{BuildConfig, TestCaseConfig};

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const PLAYABLE_TEMPLATE: &str = include_str!("prompts/vision_playable.md");
const TEST_CASE_TEMPLATE: &str = include_str!("prompts/vision_test_case.md");

/// Marker used in prompts and feedback when the browser produced no console output.
pub const NO_CONSOLE_LOGS: &str = "  No console logs captured.";

/// What the user asked for in the current iteration.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    pub task: &'a str,
    pub original_task: &'a str,
    pub feedback_mode: bool,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("task", TASK_TEMPLATE)
            .expect("task template should be valid");
        env.add_template("vision_playable", PLAYABLE_TEMPLATE)
            .expect("playable template should be valid");
        env.add_template("vision_test_case", TEST_CASE_TEMPLATE)
            .expect("test case template should be valid");
        Self { env }
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let template = self.env.get_template(name)?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))?;
        Ok(rendered.trim().to_string())
    }
}

/// System prompt for the LLM, chosen by creation vs feedback mode.
pub fn render_system(feedback_mode: bool, build: &BuildConfig, cases: &TestCaseConfig) -> Result<String> {
    PromptEngine::new().render(
        "system",
        context! {
            feedback_mode => feedback_mode,
            metadata_files => build.metadata_files,
            entry_extension => build.entry_extension,
            output_dir => build.output_dir,
            max_cases => cases.max_cases,
        },
    )
}

/// Opening human turn of a run.
pub fn render_task(task: TaskContext<'_>) -> Result<String> {
    PromptEngine::new().render(
        "task",
        context! {
            feedback_mode => task.feedback_mode,
            task => task.task.trim(),
            original_task => task.original_task.trim(),
        },
    )
}

/// Indented console log block, or the explicit no-logs marker.
pub fn format_console_logs(logs: &[String]) -> String {
    if logs.is_empty() {
        return NO_CONSOLE_LOGS.to_string();
    }
    format!("  {}", logs.join("\n  "))
}

pub fn render_playable(task: TaskContext<'_>, console_logs: &[String]) -> Result<String> {
    PromptEngine::new().render(
        "vision_playable",
        context! {
            feedback_mode => task.feedback_mode,
            task => task.task.trim(),
            original_task => task.original_task.trim(),
            console_logs => format_console_logs(console_logs),
        },
    )
}

pub fn render_test_case(expected_output: &str) -> Result<String> {
    PromptEngine::new().render(
        "vision_test_case",
        context! { expected_output => expected_output.trim() },
    )
}
