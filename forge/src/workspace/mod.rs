//! Immutable, copy-on-write workspace over a file tree.
//!
//! Every mutating operation returns a new [`Workspace`]; the receiver is never
//! changed. Clones share the underlying tree until one of them is written,
//! so snapshots held by earlier run states stay valid.

pub mod sandbox;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::diff::tree_diff;
use crate::core::paths::{Denial, InvalidPath, PathPolicy, glob_matches, glob_pattern, normalize};
use crate::core::types::FileTree;

pub use sandbox::{DetachedSandbox, ExecOutput, LocalSandbox, Sandbox, SandboxRun, read_tree};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Invalid(#[from] InvalidPath),
    #[error("permission denied: {0}")]
    PermissionDenied(#[from] Denial),
    #[error("file not found: '{path}'")]
    NotFound { path: String },
    #[error("directory not found for file '{path}': '{parent}' is a file")]
    ParentIsFile { path: String, parent: String },
    #[error("'{path}' is a directory")]
    IsDirectory { path: String },
    #[error("file '{path}' is not valid UTF-8 text")]
    NotText { path: String },
    #[error("sandbox failure: {0:#}")]
    Sandbox(anyhow::Error),
}

#[derive(Clone)]
pub struct Workspace {
    base: Arc<FileTree>,
    files: Arc<FileTree>,
    policy: Arc<PathPolicy>,
    sandbox: Arc<dyn Sandbox>,
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("files", &self.files.len())
            .field("base_files", &self.base.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Create a workspace whose base snapshot (for [`Workspace::diff`]) is `base`.
    pub fn new(base: FileTree, policy: PathPolicy, sandbox: Arc<dyn Sandbox>) -> Self {
        let base = Arc::new(base);
        Self {
            files: Arc::clone(&base),
            base,
            policy: Arc::new(policy),
            sandbox,
        }
    }

    /// Workspace that cannot run commands. Useful for pure file manipulation.
    pub fn detached(base: FileTree, policy: PathPolicy) -> Self {
        Self::new(base, policy, Arc::new(DetachedSandbox))
    }

    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    pub fn files(&self) -> &FileTree {
        &self.files
    }

    pub fn exists(&self, path: &str) -> bool {
        normalize(path).is_ok_and(|p| self.files.contains_key(&p))
    }

    pub fn read_bytes(&self, path: &str) -> Result<&[u8], WorkspaceError> {
        let path = normalize(path)?;
        self.files
            .get(&path)
            .map(Vec::as_slice)
            .ok_or(WorkspaceError::NotFound { path })
    }

    pub fn read(&self, path: &str) -> Result<String, WorkspaceError> {
        let bytes = self.read_bytes(path)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WorkspaceError::NotText {
            path: path.to_string(),
        })
    }

    /// Write a file, subject to the permission policy.
    ///
    /// Parent directories are implicit. The write fails only when an ancestor
    /// of `path` already exists as a file, or `path` itself is a directory.
    pub fn write(&self, path: &str, content: impl Into<Vec<u8>>) -> Result<Workspace, WorkspaceError> {
        self.write_inner(path, content.into(), false)
    }

    /// Write a file bypassing the permission policy. Reserved for system operations.
    pub fn write_forced(
        &self,
        path: &str,
        content: impl Into<Vec<u8>>,
    ) -> Result<Workspace, WorkspaceError> {
        self.write_inner(path, content.into(), true)
    }

    fn write_inner(&self, path: &str, content: Vec<u8>, force: bool) -> Result<Workspace, WorkspaceError> {
        let path = normalize(path)?;
        if !force {
            self.policy.check(&path)?;
        }
        let parent = ancestors(&path)
            .find(|a| self.files.contains_key(*a))
            .map(str::to_string);
        if let Some(parent) = parent {
            return Err(WorkspaceError::ParentIsFile { parent, path });
        }
        if self.is_directory(&path) {
            return Err(WorkspaceError::IsDirectory { path });
        }
        debug!(path = %path, bytes = content.len(), force, "write");
        let mut next = self.clone();
        Arc::make_mut(&mut next.files).insert(path, content);
        Ok(next)
    }

    /// Delete a file, or every file under a directory, subject to the permission policy.
    pub fn delete(&self, path: &str) -> Result<Workspace, WorkspaceError> {
        self.delete_inner(path, false)
    }

    pub fn delete_forced(&self, path: &str) -> Result<Workspace, WorkspaceError> {
        self.delete_inner(path, true)
    }

    fn delete_inner(&self, path: &str, force: bool) -> Result<Workspace, WorkspaceError> {
        let path = normalize(path)?;
        if !force {
            self.policy.check(&path)?;
        }
        let mut next = self.clone();
        if self.files.contains_key(&path) {
            Arc::make_mut(&mut next.files).remove(&path);
        } else if self.is_directory(&path) {
            let prefix = format!("{path}/");
            Arc::make_mut(&mut next.files).retain(|p, _| !p.starts_with(&prefix));
        } else {
            return Err(WorkspaceError::NotFound { path });
        }
        debug!(path = %path, force, "delete");
        Ok(next)
    }

    /// Paths matching `pattern`, in sorted order. No match is an empty list.
    pub fn list(&self, pattern: &str) -> Vec<String> {
        let Ok(glob) = glob_pattern(pattern) else {
            return Vec::new();
        };
        self.files
            .keys()
            .filter(|p| glob_matches(&glob, p))
            .cloned()
            .collect()
    }

    /// Immediate children of `dir`. Subdirectories are listed with a trailing `/`.
    pub fn entries(&self, dir: &str) -> Vec<String> {
        let prefix = match normalize(dir) {
            Ok(dir) => format!("{dir}/"),
            Err(_) => String::new(),
        };
        let mut out: Vec<String> = Vec::new();
        for path in self.files.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((sub, _)) => format!("{sub}/"),
                None => rest.to_string(),
            };
            if !out.contains(&entry) {
                out.push(entry);
            }
        }
        out
    }

    /// Files under `dir`, re-rooted so their paths are relative to it.
    pub fn subtree(&self, dir: &str) -> FileTree {
        let Ok(dir) = normalize(dir) else {
            return FileTree::new();
        };
        let prefix = format!("{dir}/");
        self.files
            .iter()
            .filter_map(|(path, content)| {
                path.strip_prefix(&prefix)
                    .map(|rest| (rest.to_string(), content.clone()))
            })
            .collect()
    }

    /// Run a command in the sandbox over a copy of this tree.
    ///
    /// Returns the workspace reflecting the command's file effects together
    /// with its exit code and output. A non-zero exit is not an error.
    #[instrument(skip_all, fields(command = %command.join(" ")))]
    pub fn exec(&self, command: &[String]) -> Result<(Workspace, ExecOutput), WorkspaceError> {
        let run = self
            .sandbox
            .exec(&self.files, command)
            .map_err(WorkspaceError::Sandbox)?;
        debug!(exit_code = run.output.exit_code, "exec finished");
        let mut next = self.clone();
        next.files = Arc::new(run.files);
        Ok((next, run.output))
    }

    /// Diff from the base snapshot to the current tree.
    pub fn diff(&self) -> String {
        tree_diff(&self.base, &self.files)
    }

    /// Write the current tree to `dir`, removing stale files but keeping `keep` prefixes.
    pub fn export(&self, dir: &Path, keep: &[String]) -> Result<()> {
        sandbox::sync_to_dir(&self.files, dir, keep)
    }

    fn is_directory(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        self.files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(p, _)| p.starts_with(&prefix))
    }
}

/// Proper ancestors of a normalized path, shortest first: `a/b/c` yields `a`, `a/b`.
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(idx, _)| &path[..idx])
}
