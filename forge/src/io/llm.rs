//! LLM oracle abstraction.
//!
//! The [`Llm`] trait decouples the state machine from the model backend.
//! [`CommandLlm`] talks to an external program over stdin/stdout; tests use
//! scripted fakes that return predetermined replies.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::types::{Reply, ToolSpec, Turn};
use crate::io::process::CheckedCommand;

/// Everything the oracle sees for one turn.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LlmRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Turn],
    pub tools: &'a [ToolSpec],
}

pub trait Llm {
    /// Propose the next assistant turn for the conversation so far.
    fn propose(&self, request: &LlmRequest<'_>) -> Result<Reply>;
}

/// LLM backed by an external command.
///
/// The request is written to stdin as JSON. The command must print a single
/// JSON reply `{"text": ..., "tool_calls": [{"id", "name", "input"}]}`.
#[derive(Debug, Clone)]
pub struct CommandLlm {
    command: CheckedCommand,
}

impl CommandLlm {
    pub fn new(command: CheckedCommand) -> Self {
        Self { command }
    }
}

impl Llm for CommandLlm {
    #[instrument(skip_all, fields(messages = request.messages.len()))]
    fn propose(&self, request: &LlmRequest<'_>) -> Result<Reply> {
        let body = serde_json::to_vec(request).context("serialize llm request")?;
        let output = self
            .command
            .run::<&str>(&[], Some(&body), None)
            .context("invoke llm")?;
        let mut reply: Reply =
            serde_json::from_slice(&output.stdout).context("parse llm reply json")?;
        assign_missing_ids(&mut reply, request.messages.len());
        debug!(tool_calls = reply.tool_calls.len(), "llm replied");
        Ok(reply)
    }
}

/// Give every tool call an id so its result can be correlated.
fn assign_missing_ids(reply: &mut Reply, turn_index: usize) {
    for (idx, call) in reply.tool_calls.iter_mut().enumerate() {
        if call.id.trim().is_empty() {
            call.id = format!("call_{turn_index}_{idx}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_ids_are_filled_per_call() {
        let mut reply: Reply = serde_json::from_str(
            r#"{"text":"","tool_calls":[{"id":"","name":"complete"},{"id":"keep","name":"complete"}]}"#,
        )
        .expect("parse");
        assign_missing_ids(&mut reply, 4);
        assert_eq!(reply.tool_calls[0].id, "call_4_0");
        assert_eq!(reply.tool_calls[1].id, "keep");
    }

    #[cfg(unix)]
    #[test]
    fn command_llm_reads_reply_from_stdout() {
        let script = r#"cat > /dev/null; echo '{"text":"hi","tool_calls":[{"name":"complete","input":{}}]}'"#;
        let llm = CommandLlm::new(CheckedCommand::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            Duration::from_secs(10),
            10_000,
        ));
        let messages = vec![Turn::human("make a game")];
        let reply = llm
            .propose(&LlmRequest {
                system: "sys",
                messages: &messages,
                tools: &[],
            })
            .expect("propose");
        assert_eq!(reply.text, "hi");
        assert_eq!(reply.tool_calls[0].name, "complete");
        assert_eq!(reply.tool_calls[0].id, "call_1_0");
    }
}
