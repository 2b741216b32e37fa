//! States of the orchestration machine and its pure routing rules.

use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;

/// Why a run reached its terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Stop {
    /// All three validation stages passed.
    Validated,
    /// A validation stage failed with the retry counter at the ceiling.
    RetriesExhausted,
    /// The LLM replied with plain text and no human is available to answer.
    AgentStopped,
    /// The human declined to continue.
    Interrupted,
    /// The run took more transitions than the configured ceiling.
    TransitionLimit { limit: u32 },
    /// An oracle call failed outside any tool or validation boundary.
    Errored { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Build,
    Playable,
    TestCases,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Build => "build",
            Stage::Playable => "playable",
            Stage::TestCases => "test_cases",
        }
    }

    /// State entered after this stage passes.
    pub fn on_pass(self) -> State {
        match self {
            Stage::Build => State::Validate(Stage::Playable),
            Stage::Playable => State::Validate(Stage::TestCases),
            Stage::TestCases => State::Done(Stop::Validated),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    LlmTurn,
    ExecuteTools,
    HumanTurn,
    Validate(Stage),
    Done(Stop),
}

impl State {
    pub fn is_done(&self) -> bool {
        matches!(self, State::Done(_))
    }
}

/// Route after the LLM replied.
///
/// Tool calls always execute. Plain text goes to the human when one is
/// present and stops the run otherwise.
pub fn after_reply(has_tool_calls: bool, interactive: bool) -> State {
    if has_tool_calls {
        State::ExecuteTools
    } else if interactive {
        State::HumanTurn
    } else {
        State::Done(Stop::AgentStopped)
    }
}

/// Route after a batch of tool calls ran.
pub fn after_tools(completed: bool) -> State {
    if completed {
        State::Validate(Stage::Build)
    } else {
        State::LlmTurn
    }
}

/// Route after a validation stage, given the already updated retry counter.
pub fn after_stage(stage: Stage, passed: bool, retry_count: u32, policy: RetryPolicy) -> State {
    if passed {
        stage.on_pass()
    } else if policy.exhausted(retry_count) {
        State::Done(Stop::RetriesExhausted)
    } else {
        State::LlmTurn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_calls_route_to_execution_regardless_of_mode() {
        assert_eq!(after_reply(true, false), State::ExecuteTools);
        assert_eq!(after_reply(true, true), State::ExecuteTools);
    }

    #[test]
    fn plain_text_routes_by_interactivity() {
        assert_eq!(after_reply(false, true), State::HumanTurn);
        assert_eq!(after_reply(false, false), State::Done(Stop::AgentStopped));
    }

    #[test]
    fn completion_enters_build_stage() {
        assert_eq!(after_tools(true), State::Validate(Stage::Build));
        assert_eq!(after_tools(false), State::LlmTurn);
    }

    #[test]
    fn stages_chain_in_order() {
        let policy = RetryPolicy::default();
        assert_eq!(
            after_stage(Stage::Build, true, 0, policy),
            State::Validate(Stage::Playable)
        );
        assert_eq!(
            after_stage(Stage::Playable, true, 0, policy),
            State::Validate(Stage::TestCases)
        );
        assert_eq!(
            after_stage(Stage::TestCases, true, 0, policy),
            State::Done(Stop::Validated)
        );
    }

    #[test]
    fn failure_returns_to_llm_until_ceiling() {
        let policy = RetryPolicy::new(5);
        assert_eq!(after_stage(Stage::Playable, false, 4, policy), State::LlmTurn);
        assert_eq!(
            after_stage(Stage::Playable, false, 5, policy),
            State::Done(Stop::RetriesExhausted)
        );
    }
}
