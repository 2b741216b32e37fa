//! Tool dispatcher: executes LLM tool calls against the workspace.
//!
//! Tools form a closed set. Every outcome, including failures, becomes a tool
//! result string so the LLM can correct itself; dispatch itself never fails.

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::paths::Denial;
use crate::core::types::{ToolCall, ToolOutcome, ToolSpec};
use crate::workspace::{Workspace, WorkspaceError};

pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const EDIT_FILE: &str = "edit_file";
pub const DELETE_FILE: &str = "delete_file";
pub const COMPLETE: &str = "complete";

/// A parsed tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOp {
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    EditFile {
        path: String,
        search: String,
        replace: String,
        replace_all: bool,
    },
    DeleteFile {
        path: String,
    },
    Complete,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),
    #[error("Invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("Search text not found in file '{path}'. Search:\n{search}")]
    SearchNotFound { path: String, search: String },
    #[error(
        "Search text found {count} times in file '{path}' (expected exactly 1). Use replace_all=true to replace all occurrences."
    )]
    AmbiguousSearch { path: String, count: usize },
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// Tool declarations offered to the LLM.
pub fn tool_specs() -> Vec<ToolSpec> {
    let path_prop = json!({"type": "string", "description": "Path relative to the workspace root"});
    vec![
        ToolSpec {
            name: READ_FILE.to_string(),
            description: "Read the content of a file.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": path_prop},
                "required": ["path"]
            }),
        },
        ToolSpec {
            name: WRITE_FILE.to_string(),
            description: "Create a file or replace its entire content.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": path_prop, "content": {"type": "string"}},
                "required": ["path", "content"]
            }),
        },
        ToolSpec {
            name: EDIT_FILE.to_string(),
            description: "Replace an exact snippet in a file. The search text must occur exactly once unless replace_all is true.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": path_prop,
                    "search": {"type": "string"},
                    "replace": {"type": "string"},
                    "replace_all": {"type": "boolean", "default": false}
                },
                "required": ["path", "search", "replace"]
            }),
        },
        ToolSpec {
            name: DELETE_FILE.to_string(),
            description: "Delete a file.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": path_prop},
                "required": ["path"]
            }),
        },
        ToolSpec {
            name: COMPLETE.to_string(),
            description: "Mark the task as complete. This will run tests and type checks to ensure the changes are correct.".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        },
    ]
}

fn string_arg(tool: &str, input: &Value, key: &str) -> Result<String, ToolError> {
    input
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("missing string field '{key}'"),
        })
}

impl ToolOp {
    pub fn parse(call: &ToolCall) -> Result<Self, ToolError> {
        let name = call.name.as_str();
        let input = &call.input;
        let op = match name {
            READ_FILE => ToolOp::ReadFile {
                path: string_arg(name, input, "path")?,
            },
            WRITE_FILE => ToolOp::WriteFile {
                path: string_arg(name, input, "path")?,
                content: string_arg(name, input, "content")?,
            },
            EDIT_FILE => {
                let replace_all = match input.get("replace_all") {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(flag)) => *flag,
                    Some(other) => {
                        return Err(ToolError::InvalidArguments {
                            tool: name.to_string(),
                            reason: format!("'replace_all' must be a boolean, got {other}"),
                        });
                    }
                };
                let search = string_arg(name, input, "search")?;
                if search.is_empty() {
                    return Err(ToolError::InvalidArguments {
                        tool: name.to_string(),
                        reason: "'search' must not be empty".to_string(),
                    });
                }
                ToolOp::EditFile {
                    path: string_arg(name, input, "path")?,
                    search,
                    replace: string_arg(name, input, "replace")?,
                    replace_all,
                }
            }
            DELETE_FILE => ToolOp::DeleteFile {
                path: string_arg(name, input, "path")?,
            },
            COMPLETE => ToolOp::Complete,
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };
        Ok(op)
    }

    fn path(&self) -> Option<&str> {
        match self {
            ToolOp::ReadFile { path }
            | ToolOp::WriteFile { path, .. }
            | ToolOp::EditFile { path, .. }
            | ToolOp::DeleteFile { path } => Some(path.as_str()),
            ToolOp::Complete => None,
        }
    }
}

/// Successful result of one operation.
#[derive(Debug)]
struct Applied {
    content: String,
    workspace: Option<Workspace>,
    completed: bool,
}

fn apply(workspace: &Workspace, op: &ToolOp) -> Result<Applied, ToolError> {
    let applied = match op {
        ToolOp::ReadFile { path } => Applied {
            content: workspace.read(path)?,
            workspace: None,
            completed: false,
        },
        ToolOp::WriteFile { path, content } => Applied {
            content: "success".to_string(),
            workspace: Some(workspace.write(path, content.as_bytes())?),
            completed: false,
        },
        ToolOp::EditFile {
            path,
            search,
            replace,
            replace_all,
        } => {
            let current = workspace.read(path)?;
            let count = current.matches(search.as_str()).count();
            if count == 0 {
                return Err(ToolError::SearchNotFound {
                    path: path.clone(),
                    search: search.clone(),
                });
            }
            if count > 1 && !replace_all {
                return Err(ToolError::AmbiguousSearch {
                    path: path.clone(),
                    count,
                });
            }
            let updated = if *replace_all {
                current.replace(search.as_str(), replace)
            } else {
                current.replacen(search.as_str(), replace, 1)
            };
            let content = if *replace_all {
                format!("success - replaced {count} occurrences")
            } else {
                "success".to_string()
            };
            Applied {
                content,
                workspace: Some(workspace.write(path, updated)?),
                completed: false,
            }
        }
        ToolOp::DeleteFile { path } => Applied {
            content: "success".to_string(),
            workspace: Some(workspace.delete(path)?),
            completed: false,
        },
        ToolOp::Complete => Applied {
            content: "Task marked as complete. Running validation.".to_string(),
            workspace: None,
            completed: true,
        },
    };
    Ok(applied)
}

/// Render an error the way the LLM sees it.
fn describe_error(op: Option<&ToolOp>, err: &ToolError) -> String {
    let path = op.and_then(ToolOp::path).unwrap_or_default();
    let (Some(op), ToolError::Workspace(inner)) = (op, err) else {
        return err.to_string();
    };
    match (op, inner) {
        (ToolOp::WriteFile { .. } | ToolOp::EditFile { .. }, WorkspaceError::PermissionDenied(denial)) => {
            permission_denied("writing", path, denial)
        }
        (ToolOp::DeleteFile { .. }, WorkspaceError::PermissionDenied(denial)) => {
            permission_denied("deleting", path, denial)
        }
        (ToolOp::WriteFile { .. }, WorkspaceError::ParentIsFile { parent, .. }) => {
            format!("Directory not found for file '{path}': '{parent}' is a file")
        }
        (_, WorkspaceError::NotFound { .. }) => format!("File '{path}' not found"),
        _ => format!("Error with file '{path}': {inner}"),
    }
}

fn permission_denied(action: &str, path: &str, denial: &Denial) -> String {
    format!(
        "Permission denied {action} file '{path}': {denial}. Probably this file is out of scope for this particular task."
    )
}

/// Applies tool calls in order, threading the workspace through each one.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    workspace: Workspace,
}

impl ToolDispatcher {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn into_workspace(self) -> Workspace {
        self.workspace
    }

    /// Dispatch one call. Returns its outcome and whether it was `complete`.
    #[instrument(skip_all, fields(tool = %call.name, call_id = %call.id))]
    pub fn dispatch(&mut self, call: &ToolCall) -> (ToolOutcome, bool) {
        match ToolOp::parse(call) {
            Err(err) => {
                warn!(err = %err, "rejected tool call");
                (error_outcome(call, describe_error(None, &err)), false)
            }
            Ok(op) => match apply(&self.workspace, &op) {
                Ok(applied) => {
                    if let Some(next) = applied.workspace {
                        self.workspace = next;
                    }
                    debug!(completed = applied.completed, "tool call succeeded");
                    let outcome = ToolOutcome {
                        call_id: call.id.clone(),
                        content: applied.content,
                        is_error: false,
                    };
                    (outcome, applied.completed)
                }
                Err(err) => {
                    debug!(err = %err, "tool call failed");
                    (error_outcome(call, describe_error(Some(&op), &err)), false)
                }
            },
        }
    }

    /// Dispatch every call in order. Returns the outcomes and whether any call was `complete`.
    pub fn dispatch_all(&mut self, calls: &[ToolCall]) -> (Vec<ToolOutcome>, bool) {
        let mut completed = false;
        let outcomes = calls
            .iter()
            .map(|call| {
                let (outcome, done) = self.dispatch(call);
                completed |= done;
                outcome
            })
            .collect();
        (outcomes, completed)
    }
}

fn error_outcome(call: &ToolCall, content: String) -> ToolOutcome {
    ToolOutcome {
        call_id: call.id.clone(),
        content,
        is_error: true,
    }
}
