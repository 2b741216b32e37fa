//! Execution sandboxes that run commands against a workspace file tree.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::core::types::FileTree;
use crate::io::process::run_command_with_timeout;

/// Exit code and captured output of a sandboxed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Result of a sandboxed command: its output and the file tree it left behind.
#[derive(Debug, Clone)]
pub struct SandboxRun {
    pub output: ExecOutput,
    pub files: FileTree,
}

/// Runs a command over a copy of a file tree.
///
/// Implementations must not observe or mutate any tree other than `files`;
/// the returned tree becomes the next workspace snapshot.
pub trait Sandbox: Send + Sync {
    fn exec(&self, files: &FileTree, command: &[String]) -> Result<SandboxRun>;
}

/// Sandbox for workspaces that never execute commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedSandbox;

impl Sandbox for DetachedSandbox {
    fn exec(&self, _files: &FileTree, command: &[String]) -> Result<SandboxRun> {
        bail!("workspace has no sandbox to run `{}`", command.join(" "))
    }
}

/// Sandbox backed by a private scratch directory on the local filesystem.
///
/// Before each command the directory is synchronized with the tree. Paths
/// under `ignore` prefixes (dependency caches, VCS metadata) survive between
/// commands and are never read back into the tree.
#[derive(Debug, Clone)]
pub struct LocalSandbox {
    root: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    ignore: Vec<String>,
}

impl LocalSandbox {
    pub fn new(root: PathBuf, timeout: Duration, output_limit_bytes: usize, ignore: Vec<String>) -> Self {
        Self {
            root,
            timeout,
            output_limit_bytes,
            ignore,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Sandbox for LocalSandbox {
    #[instrument(skip_all, fields(root = %self.root.display(), command = %command.join(" ")))]
    fn exec(&self, files: &FileTree, command: &[String]) -> Result<SandboxRun> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("sandbox command is empty"))?;
        sync_to_dir(files, &self.root, &self.ignore)?;

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.root);
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run `{}` in sandbox", command.join(" ")))?;

        let stdout = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            output.stdout_truncated_notice(program)
        );
        let mut stderr = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stderr),
            output.stderr_truncated_notice(program)
        );
        let exit_code = if output.timed_out {
            stderr.push_str(&format!(
                "\n[{program} timed out after {}s]\n",
                self.timeout.as_secs()
            ));
            -1
        } else {
            output.status.code().unwrap_or(-1)
        };

        let files = read_tree(&self.root, &self.ignore)?;
        debug!(exit_code, files = files.len(), "sandbox command finished");
        Ok(SandboxRun {
            output: ExecOutput {
                exit_code,
                stdout,
                stderr,
            },
            files,
        })
    }
}

fn is_kept(rel: &str, is_dir: bool, keep: &[String]) -> bool {
    let candidate = if is_dir { format!("{rel}/") } else { rel.to_string() };
    keep.iter().any(|prefix| candidate.starts_with(prefix.as_str()))
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

/// Read every file under `dir` into a tree, skipping `ignore` prefixes.
pub fn read_tree(dir: &Path, ignore: &[String]) -> Result<FileTree> {
    let mut tree = FileTree::new();
    if !dir.exists() {
        return Ok(tree);
    }
    let walker = WalkDir::new(dir).min_depth(1).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| {
        relative(dir, e.path()).is_none_or(|rel| !is_kept(&rel, e.file_type().is_dir(), ignore))
    }) {
        let entry = entry.with_context(|| format!("walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative(dir, entry.path()) else {
            warn!(path = %entry.path().display(), "skipping non UTF-8 path");
            continue;
        };
        let content =
            fs::read(entry.path()).with_context(|| format!("read {}", entry.path().display()))?;
        tree.insert(rel, content);
    }
    Ok(tree)
}

/// Make `dir` mirror `tree`: stale files are removed and changed files rewritten.
/// Paths under `keep` prefixes are left untouched.
pub fn sync_to_dir(tree: &FileTree, dir: &Path, keep: &[String]) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    let on_disk = read_tree(dir, keep)?;
    for path in on_disk.keys().filter(|p| !tree.contains_key(*p)) {
        let target = dir.join(path);
        fs::remove_file(&target).with_context(|| format!("remove {}", target.display()))?;
    }
    for (path, content) in tree {
        if on_disk.get(path) == Some(content) {
            continue;
        }
        let target = dir.join(path);
        if target.is_dir() {
            fs::remove_dir_all(&target).with_context(|| format!("remove {}", target.display()))?;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&target, content).with_context(|| format!("write {}", target.display()))?;
    }
    Ok(())
}
