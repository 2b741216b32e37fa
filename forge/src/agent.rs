//! The orchestration state machine.
//!
//! [`Agent::step`] is the transition function `(State, RunState) -> (State, RunState)`.
//! [`Agent::run`] drives it until a terminal state or the transition ceiling.
//! Routing decisions live in [`crate::core::machine`]; this module performs
//! the oracle calls and threads the results through [`RunState`].

use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::machine::{Stage, State, Stop, after_reply, after_stage, after_tools};
use crate::core::retry::RetryPolicy;
use crate::core::types::{Conversation, ToolSpec, Turn};
use crate::io::browser::Browser;
use crate::io::config::{BuildConfig, ForgeConfig, TestCaseConfig};
use crate::io::debug_log::DebugRun;
use crate::io::human::{Human, HumanReply};
use crate::io::llm::{Llm, LlmRequest};
use crate::io::prompt::{TaskContext, render_system, render_task};
use crate::io::session::RunSummary;
use crate::io::vision::Vision;
use crate::tools::{ToolDispatcher, tool_specs};
use crate::validate::{
    StageEnv, ValidationResult, validate_build, validate_playable, validate_test_cases,
};
use crate::workspace::Workspace;

/// Canned human turn used when the human answers with an empty line.
pub const CONTINUE_MESSAGE: &str = "Please continue with the task.";

/// Working state threaded through every transition.
#[derive(Debug, Clone)]
pub struct RunState {
    pub conversation: Conversation,
    pub workspace: Workspace,
    /// One-shot latch set by the `complete` tool and cleared by any validation failure.
    pub completed: bool,
    pub failures: Vec<String>,
    pub retry_count: u32,
    pub feedback_mode: bool,
    /// Current request: the creation prompt, or the feedback being applied.
    pub task: String,
    /// Prompt that created the game.
    pub original_task: String,
}

impl RunState {
    /// Fresh state for a new game, seeded with the task as the first human turn.
    pub fn creation(task: &str, workspace: Workspace) -> anyhow::Result<Self> {
        let mut run = Self {
            conversation: Conversation::new(),
            workspace,
            completed: false,
            failures: Vec::new(),
            retry_count: 0,
            feedback_mode: false,
            task: task.to_string(),
            original_task: task.to_string(),
        };
        run.push_task_turn()?;
        Ok(run)
    }

    /// State for applying `feedback` to an existing game, continuing `conversation`.
    pub fn feedback(
        original_task: &str,
        feedback: &str,
        conversation: Conversation,
        workspace: Workspace,
    ) -> anyhow::Result<Self> {
        let mut run = Self {
            conversation,
            workspace,
            completed: false,
            failures: Vec::new(),
            retry_count: 0,
            feedback_mode: true,
            task: feedback.to_string(),
            original_task: original_task.to_string(),
        };
        run.push_task_turn()?;
        Ok(run)
    }

    pub fn task_context(&self) -> TaskContext<'_> {
        TaskContext {
            task: &self.task,
            original_task: &self.original_task,
            feedback_mode: self.feedback_mode,
        }
    }

    pub fn summary(&self, transitions: u32, stop: Option<Stop>) -> RunSummary {
        RunSummary {
            completed: matches!(stop, Some(Stop::Validated)),
            retry_count: self.retry_count,
            failures: self.failures.clone(),
            feedback_mode: self.feedback_mode,
            task: self.task.clone(),
            original_task: self.original_task.clone(),
            transitions,
            stop,
        }
    }

    fn push_task_turn(&mut self) -> anyhow::Result<()> {
        let text = render_task(self.task_context())?;
        self.conversation.push(Turn::human(text));
        Ok(())
    }
}

/// External collaborators consulted by the machine.
#[derive(Clone, Copy)]
pub struct Oracles<'a> {
    pub llm: &'a dyn Llm,
    pub vision: &'a dyn Vision,
    pub browser: &'a dyn Browser,
    /// Present only in interactive runs.
    pub human: Option<&'a dyn Human>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub retry: RetryPolicy,
    pub max_transitions: u32,
    pub build: BuildConfig,
    pub test_cases: TestCaseConfig,
    /// Where each validation pass writes its debug artifacts, if anywhere.
    pub debug_root: Option<PathBuf>,
}

impl AgentConfig {
    pub fn from_config(cfg: &ForgeConfig, debug_root: Option<PathBuf>) -> Self {
        Self {
            retry: cfg.retry_policy(),
            max_transitions: cfg.max_transitions,
            build: cfg.build.clone(),
            test_cases: cfg.test_cases.clone(),
            debug_root,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_config(&ForgeConfig::default(), None)
    }
}

/// How a driven run ended.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub run: RunState,
    pub stop: Stop,
    pub transitions: u32,
}

pub struct Agent<'a> {
    oracles: Oracles<'a>,
    config: AgentConfig,
    tools: Vec<ToolSpec>,
    debug: Option<DebugRun>,
}

impl<'a> Agent<'a> {
    pub fn new(oracles: Oracles<'a>, config: AgentConfig) -> Self {
        Self {
            oracles,
            config,
            tools: tool_specs(),
            debug: None,
        }
    }

    /// Drive the machine from `LlmTurn` until it stops.
    #[instrument(skip_all, fields(feedback_mode = run.feedback_mode))]
    pub fn run(&mut self, mut run: RunState) -> AgentOutcome {
        let mut state = State::LlmTurn;
        let mut transitions = 0u32;
        loop {
            if let State::Done(stop) = state {
                info!(?stop, transitions, retry_count = run.retry_count, "run finished");
                return AgentOutcome {
                    run,
                    stop,
                    transitions,
                };
            }
            if transitions >= self.config.max_transitions {
                warn!(limit = self.config.max_transitions, "transition limit reached");
                state = State::Done(Stop::TransitionLimit {
                    limit: self.config.max_transitions,
                });
                continue;
            }
            transitions += 1;
            (state, run) = self.step(state, run);
        }
    }

    /// Perform one transition.
    #[instrument(skip_all, fields(state = ?state))]
    pub fn step(&mut self, state: State, run: RunState) -> (State, RunState) {
        match state {
            State::LlmTurn => self.llm_turn(run),
            State::ExecuteTools => execute_tools(run),
            State::HumanTurn => self.human_turn(run),
            State::Validate(stage) => self.validate(stage, run),
            State::Done(stop) => (State::Done(stop), run),
        }
    }

    fn llm_turn(&self, mut run: RunState) -> (State, RunState) {
        if run.completed {
            debug!("completion latch set, skipping llm");
            return (State::Validate(Stage::Build), run);
        }
        let system = match render_system(run.feedback_mode, &self.config.build, &self.config.test_cases)
        {
            Ok(system) => system,
            Err(err) => return (errored(&err), run),
        };
        let request = LlmRequest {
            system: &system,
            messages: run.conversation.turns(),
            tools: &self.tools,
        };
        let reply = match self.oracles.llm.propose(&request) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "llm call failed");
                return (errored(&err), run);
            }
        };
        debug!(tool_calls = reply.tool_calls.len(), "llm replied");
        let has_tool_calls = !reply.tool_calls.is_empty();
        run.conversation.push(reply.into_turn());
        (after_reply(has_tool_calls, self.oracles.human.is_some()), run)
    }

    fn human_turn(&self, mut run: RunState) -> (State, RunState) {
        let Some(human) = self.oracles.human else {
            return (State::Done(Stop::AgentStopped), run);
        };
        let assistant_text = run
            .conversation
            .trailing_assistant()
            .map(|turn| turn.content.clone())
            .unwrap_or_default();
        match human.respond(&assistant_text) {
            Ok(HumanReply::Message(text)) => {
                run.conversation.push(Turn::human(text));
                (State::LlmTurn, run)
            }
            Ok(HumanReply::Continue) => {
                run.conversation.push(Turn::human(CONTINUE_MESSAGE));
                (State::LlmTurn, run)
            }
            Ok(HumanReply::Quit) => (State::Done(Stop::Interrupted), run),
            Err(err) => (errored(&err), run),
        }
    }

    fn validate(&mut self, stage: Stage, mut run: RunState) -> (State, RunState) {
        if stage == Stage::Build {
            self.debug = self
                .config
                .debug_root
                .as_deref()
                .map(|root| DebugRun::start(root, Utc::now()));
        }
        let result = self.run_stage(stage, &run);
        run.retry_count = result.retry_count;
        if let Some(workspace) = result.workspace {
            run.workspace = workspace;
        }
        if result.passed {
            let next = stage.on_pass();
            if next == State::Done(Stop::Validated) {
                run.failures.clear();
            }
            return (next, run);
        }

        run.failures.extend(result.failures);
        if let Some(feedback) = result.feedback {
            run.conversation.push(Turn::human(feedback));
        }
        run.completed = false;
        info!(
            stage = stage.label(),
            retry_count = run.retry_count,
            max_retries = self.config.retry.max_retries,
            "validation failed"
        );
        (after_stage(stage, false, run.retry_count, self.config.retry), run)
    }

    fn run_stage(&self, stage: Stage, run: &RunState) -> ValidationResult {
        let env = StageEnv {
            browser: self.oracles.browser,
            vision: self.oracles.vision,
            debug: self.debug.as_ref(),
        };
        let output_dir = &self.config.build.output_dir;
        match stage {
            Stage::Build => validate_build(
                &run.workspace,
                &self.config.build,
                &self.config.test_cases,
                run.retry_count,
            ),
            Stage::Playable => validate_playable(
                &run.workspace,
                output_dir,
                env,
                run.task_context(),
                run.retry_count,
            ),
            Stage::TestCases => validate_test_cases(
                &run.workspace,
                output_dir,
                &self.config.test_cases,
                env,
                run.retry_count,
            ),
        }
    }
}

fn execute_tools(mut run: RunState) -> (State, RunState) {
    let calls = run
        .conversation
        .trailing_assistant()
        .map(|turn| turn.tool_calls.clone())
        .unwrap_or_default();
    let mut dispatcher = ToolDispatcher::new(run.workspace);
    let (outcomes, completed) = dispatcher.dispatch_all(&calls);
    run.workspace = dispatcher.into_workspace();
    for outcome in outcomes {
        run.conversation.push(Turn::tool_result(outcome));
    }
    run.completed |= completed;
    (after_tools(run.completed), run)
}

fn errored(err: &anyhow::Error) -> State {
    State::Done(Stop::Errored {
        message: format!("{err:#}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::test_support::{
        ScriptedBrowser, ScriptedHuman, ScriptedLlm, ScriptedVision, detached_workspace,
        text_reply, tool_call, tools_reply,
    };
    use serde_json::json;

    fn oracles<'a>(
        llm: &'a ScriptedLlm,
        vision: &'a ScriptedVision,
        browser: &'a ScriptedBrowser,
        human: Option<&'a ScriptedHuman>,
    ) -> Oracles<'a> {
        Oracles {
            llm,
            vision,
            browser,
            human: human.map(|h| h as &dyn Human),
        }
    }

    fn fresh_run() -> RunState {
        RunState::creation("make snake", detached_workspace(&[])).expect("run state")
    }

    #[test]
    fn creation_seeds_task_turn() {
        let run = fresh_run();
        assert_eq!(run.conversation.len(), 1);
        assert_eq!(run.conversation.turns()[0].role, Role::Human);
        assert!(run.conversation.turns()[0].content.contains("make snake"));
    }

    #[test]
    fn tool_calls_route_to_execution_and_back() {
        let llm = ScriptedLlm::new([tools_reply(vec![tool_call(
            "c1",
            "write_file",
            json!({"path": "src/main.ts", "content": "x"}),
        )])]);
        let vision = ScriptedVision::default();
        let browser = ScriptedBrowser::default();
        let mut agent = Agent::new(oracles(&llm, &vision, &browser, None), AgentConfig::default());

        let (state, run) = agent.step(State::LlmTurn, fresh_run());
        assert_eq!(state, State::ExecuteTools);
        let (state, run) = agent.step(state, run);
        assert_eq!(state, State::LlmTurn);
        assert_eq!(run.workspace.read("src/main.ts").expect("written"), "x");
        let last = run.conversation.last().expect("tool result");
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.content, "success");
        assert_eq!(last.tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn plain_text_without_human_stops() {
        let llm = ScriptedLlm::new([text_reply("done?")]);
        let vision = ScriptedVision::default();
        let browser = ScriptedBrowser::default();
        let mut agent = Agent::new(oracles(&llm, &vision, &browser, None), AgentConfig::default());

        let outcome = agent.run(fresh_run());
        assert_eq!(outcome.stop, Stop::AgentStopped);
        assert_eq!(outcome.transitions, 1);
    }

    #[test]
    fn human_continue_appends_canned_message() {
        let llm = ScriptedLlm::new([text_reply("shall I?")]);
        let vision = ScriptedVision::default();
        let browser = ScriptedBrowser::default();
        let human = ScriptedHuman::new([HumanReply::Continue]);
        let mut agent = Agent::new(
            oracles(&llm, &vision, &browser, Some(&human)),
            AgentConfig::default(),
        );

        let (state, run) = agent.step(State::LlmTurn, fresh_run());
        assert_eq!(state, State::HumanTurn);
        let (state, run) = agent.step(state, run);
        assert_eq!(state, State::LlmTurn);
        assert_eq!(human.seen(), vec!["shall I?".to_string()]);
        assert_eq!(run.conversation.last().expect("turn").content, CONTINUE_MESSAGE);
    }

    #[test]
    fn llm_error_ends_run_with_message() {
        let llm = ScriptedLlm::default().then_fail("rate limited");
        let vision = ScriptedVision::default();
        let browser = ScriptedBrowser::default();
        let mut agent = Agent::new(oracles(&llm, &vision, &browser, None), AgentConfig::default());

        let outcome = agent.run(fresh_run());
        assert_eq!(
            outcome.stop,
            Stop::Errored {
                message: "rate limited".to_string()
            }
        );
    }

    #[test]
    fn latch_skips_llm_and_failure_clears_it() {
        let llm = ScriptedLlm::default();
        let vision = ScriptedVision::default();
        let browser = ScriptedBrowser::default();
        let mut agent = Agent::new(oracles(&llm, &vision, &browser, None), AgentConfig::default());
        let mut run = fresh_run();
        run.completed = true;

        let (state, run) = agent.step(State::LlmTurn, run);
        assert_eq!(state, State::Validate(Stage::Build));
        assert_eq!(llm.calls(), 0);

        // The detached workspace cannot run the type checker, so the build fails.
        let (state, run) = agent.step(state, run);
        assert_eq!(state, State::LlmTurn);
        assert!(!run.completed);
        assert_eq!(run.retry_count, 1);
        assert_eq!(run.failures.len(), 1);
        let feedback = run.conversation.last().expect("feedback");
        assert_eq!(feedback.role, Role::Human);
        assert!(feedback.content.starts_with("Build validation error:"));
    }

    #[test]
    fn transition_limit_is_enforced() {
        let replies = (0..3).map(|i| {
            tools_reply(vec![tool_call(
                &format!("c{i}"),
                "read_file",
                json!({"path": "missing.txt"}),
            )])
        });
        let llm = ScriptedLlm::new(replies);
        let vision = ScriptedVision::default();
        let browser = ScriptedBrowser::default();
        let config = AgentConfig {
            max_transitions: 4,
            ..AgentConfig::default()
        };
        let mut agent = Agent::new(oracles(&llm, &vision, &browser, None), config);

        let outcome = agent.run(fresh_run());
        assert_eq!(outcome.stop, Stop::TransitionLimit { limit: 4 });
        assert_eq!(outcome.transitions, 4);
        assert_eq!(llm.calls(), 2);
    }
}
