//! Test-only helpers: file trees, workspaces, and scripted oracle fakes.
//!
//! Every fake replays a queue of canned responses and records what it was
//! asked, so tests can assert both the outcome and the interaction.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow, bail};
use serde_json::Value;

use crate::core::paths::PathPolicy;
use crate::core::types::{FileTree, Reply, ToolCall};
use crate::io::browser::{Browser, Capture};
use crate::io::human::{Human, HumanReply};
use crate::io::llm::{Llm, LlmRequest};
use crate::io::vision::Vision;
use crate::workspace::{ExecOutput, Sandbox, SandboxRun, Workspace};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn drained(name: &str, remaining: usize) -> Result<()> {
    if remaining == 0 {
        Ok(())
    } else {
        Err(anyhow!("{name} has {remaining} unused scripted responses"))
    }
}

/// Build a file tree from `(path, content)` pairs.
pub fn tree(entries: &[(&str, &str)]) -> FileTree {
    entries
        .iter()
        .map(|(path, content)| (path.to_string(), content.as_bytes().to_vec()))
        .collect()
}

/// Unrestricted workspace that cannot run commands.
pub fn detached_workspace(entries: &[(&str, &str)]) -> Workspace {
    Workspace::detached(tree(entries), PathPolicy::open())
}

/// Unrestricted workspace whose commands are answered by `sandbox`.
pub fn scripted_workspace(entries: &[(&str, &str)], sandbox: &ScriptedSandbox) -> Workspace {
    Workspace::new(tree(entries), PathPolicy::open(), Arc::new(sandbox.clone()))
}

pub fn tool_call(id: &str, name: &str, input: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        input,
    }
}

/// Reply with plain text and no tool calls.
pub fn text_reply(text: &str) -> Reply {
    Reply {
        text: text.to_string(),
        tool_calls: Vec::new(),
    }
}

pub fn tools_reply(calls: Vec<ToolCall>) -> Reply {
    Reply {
        text: String::new(),
        tool_calls: calls,
    }
}

/// One scripted sandbox command: its output plus file effects.
#[derive(Debug, Clone, Default)]
pub struct SandboxStep {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub writes: Vec<(String, String)>,
    /// Makes the sandbox itself fail instead of returning output.
    pub error: Option<String>,
}

impl SandboxStep {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn exit(exit_code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            ..Self::default()
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn writes(mut self, files: &[(&str, &str)]) -> Self {
        self.writes
            .extend(files.iter().map(|(p, c)| (p.to_string(), c.to_string())));
        self
    }
}

#[derive(Debug, Default)]
struct SandboxState {
    steps: VecDeque<SandboxStep>,
    commands: Vec<String>,
}

/// Sandbox that replays [`SandboxStep`]s. Clones share the same script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSandbox {
    state: Arc<Mutex<SandboxState>>,
}

impl ScriptedSandbox {
    pub fn new(steps: impl IntoIterator<Item = SandboxStep>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SandboxState {
                steps: steps.into_iter().collect(),
                commands: Vec::new(),
            })),
        }
    }

    /// Commands run so far, each joined with spaces.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.state).commands.clone()
    }

    pub fn assert_drained(&self) -> Result<()> {
        drained("sandbox", lock(&self.state).steps.len())
    }
}

impl Sandbox for ScriptedSandbox {
    fn exec(&self, files: &FileTree, command: &[String]) -> Result<SandboxRun> {
        let mut state = lock(&self.state);
        state.commands.push(command.join(" "));
        let Some(step) = state.steps.pop_front() else {
            bail!("unexpected sandbox command `{}`", command.join(" "));
        };
        if let Some(message) = step.error {
            bail!("{message}");
        }
        let mut files = files.clone();
        for (path, content) in step.writes {
            files.insert(path, content.into_bytes());
        }
        Ok(SandboxRun {
            output: ExecOutput {
                exit_code: step.exit_code,
                stdout: step.stdout,
                stderr: step.stderr,
            },
            files,
        })
    }
}

/// A request as the scripted LLM saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub messages: Vec<crate::core::types::Turn>,
    pub tool_names: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<Reply, String>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlm {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            requests: Mutex::default(),
        }
    }

    /// Queue a failing call after the replies queued so far.
    pub fn then_fail(self, message: &str) -> Self {
        lock(&self.replies).push_back(Err(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn assert_drained(&self) -> Result<()> {
        drained("llm", lock(&self.replies).len())
    }
}

impl Llm for ScriptedLlm {
    fn propose(&self, request: &LlmRequest<'_>) -> Result<Reply> {
        lock(&self.requests).push(RecordedRequest {
            system: request.system.to_string(),
            messages: request.messages.to_vec(),
            tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
        });
        match lock(&self.replies).pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => bail!("scripted llm has no reply left"),
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedVision {
    answers: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedVision {
    pub fn new<S: Into<String>>(answers: impl IntoIterator<Item = S>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().map(|a| Ok(a.into())).collect()),
            prompts: Mutex::default(),
        }
    }

    /// Oracle whose next call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            answers: Mutex::new(VecDeque::from([Err(message.to_string())])),
            prompts: Mutex::default(),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn assert_drained(&self) -> Result<()> {
        drained("vision", lock(&self.answers).len())
    }
}

impl Vision for ScriptedVision {
    fn ask(&self, _screenshot: &[u8], prompt: &str) -> Result<String> {
        lock(&self.prompts).push(prompt.to_string());
        match lock(&self.answers).pop_front() {
            Some(Ok(answer)) => Ok(answer),
            Some(Err(message)) => Err(anyhow!(message)),
            None => bail!("scripted vision has no answer left"),
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedBrowser {
    captures: Mutex<VecDeque<Result<Capture, String>>>,
    resets: Mutex<usize>,
    sites: Mutex<Vec<FileTree>>,
    payloads: Mutex<Vec<Option<String>>>,
}

impl ScriptedBrowser {
    pub fn new(captures: impl IntoIterator<Item = Capture>) -> Self {
        Self {
            captures: Mutex::new(captures.into_iter().map(Ok).collect()),
            ..Self::default()
        }
    }

    /// Browser whose next capture fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            captures: Mutex::new(VecDeque::from([Err(message.to_string())])),
            ..Self::default()
        }
    }

    pub fn resets(&self) -> usize {
        *lock(&self.resets)
    }

    pub fn loaded_sites(&self) -> Vec<FileTree> {
        lock(&self.sites).clone()
    }

    /// Test-case payload handed to each capture, `None` for plain page loads.
    pub fn payloads(&self) -> Vec<Option<String>> {
        lock(&self.payloads).clone()
    }

    pub fn assert_drained(&self) -> Result<()> {
        drained("browser", lock(&self.captures).len())
    }
}

impl Browser for ScriptedBrowser {
    fn reset(&self) -> Result<()> {
        *lock(&self.resets) += 1;
        Ok(())
    }

    fn load(&self, site: &FileTree) -> Result<()> {
        lock(&self.sites).push(site.clone());
        Ok(())
    }

    fn capture(&self, test_case: Option<&str>) -> Result<Capture> {
        lock(&self.payloads).push(test_case.map(str::to_string));
        match lock(&self.captures).pop_front() {
            Some(Ok(capture)) => Ok(capture),
            Some(Err(message)) => Err(anyhow!(message)),
            None => bail!("scripted browser has no capture left"),
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedHuman {
    replies: Mutex<VecDeque<HumanReply>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedHuman {
    pub fn new(replies: impl IntoIterator<Item = HumanReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            seen: Mutex::default(),
        }
    }

    /// Assistant texts shown to the human so far.
    pub fn seen(&self) -> Vec<String> {
        lock(&self.seen).clone()
    }

    pub fn assert_drained(&self) -> Result<()> {
        drained("human", lock(&self.replies).len())
    }
}

impl Human for ScriptedHuman {
    fn respond(&self, assistant_text: &str) -> Result<HumanReply> {
        lock(&self.seen).push(assistant_text.to_string());
        lock(&self.replies)
            .pop_front()
            .ok_or_else(|| anyhow!("scripted human has no reply left"))
    }
}
