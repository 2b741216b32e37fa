//! Git checkpoints for exported games.
//!
//! Each session's exported game directory is a git repository. A run works on
//! branch `session/<id>`; its result is committed there and merged into the
//! default branch once every validation stage passed.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_BRANCH: &str = "main";
const AUTHOR_NAME: &str = "forge";
const AUTHOR_EMAIL: &str = "forge@localhost";

pub fn session_branch(session_id: &str) -> String {
    format!("session/{session_id}")
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn is_repo(&self) -> bool {
        self.workdir.join(".git").exists()
    }

    /// Initialize a repository whose default branch has one empty root commit.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn init(&self) -> Result<()> {
        self.run_checked(&["init", "--quiet", &format!("--initial-branch={DEFAULT_BRANCH}")])?;
        self.run_checked(&["config", "user.name", AUTHOR_NAME])?;
        self.run_checked(&["config", "user.email", AUTHOR_EMAIL])?;
        self.run_checked(&["commit", "--quiet", "--allow-empty", "-m", "Initialize game repository"])?;
        debug!("initialized repository");
        Ok(())
    }

    /// Return the current branch name (errors on detached HEAD).
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD in {}", self.workdir.display()));
        }
        Ok(name)
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])?
            .status;
        Ok(status.success())
    }

    /// Switch to `branch`, creating it at HEAD when missing.
    #[instrument(skip_all, fields(branch))]
    pub fn switch_to(&self, branch: &str) -> Result<()> {
        if self.current_branch()? == branch {
            return Ok(());
        }
        if self.branch_exists(branch)? {
            self.run_checked(&["checkout", "--quiet", branch])?;
        } else {
            self.run_checked(&["checkout", "--quiet", "-b", branch])?;
        }
        Ok(())
    }

    /// Stage all changes, including deletions.
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes. Returns `false` when there was nothing to commit.
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.run_checked(&["commit", "--quiet", "-m", message])?;
        Ok(true)
    }

    /// Merge `branch` into the current branch with a merge commit.
    pub fn merge(&self, branch: &str, message: &str) -> Result<()> {
        self.run_checked(&["merge", "--quiet", "--no-ff", "-m", message, branch])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Put the game directory on the session branch before a run exports into it.
pub fn prepare_session_branch(game_dir: &Path, session_id: &str) -> Result<String> {
    let git = Git::new(game_dir);
    if !git.is_repo() {
        git.init()?;
    }
    let branch = session_branch(session_id);
    git.switch_to(&branch)?;
    Ok(branch)
}

/// Commit the exported tree on `branch`; merge it into the default branch when `merge`.
#[instrument(skip_all, fields(branch, merge))]
pub fn commit_checkpoint(game_dir: &Path, branch: &str, message: &str, merge: bool) -> Result<()> {
    let git = Git::new(game_dir);
    git.switch_to(branch)?;
    git.add_all()?;
    git.commit_staged(message)?;
    if merge {
        git.switch_to(DEFAULT_BRANCH)?;
        git.merge(branch, &format!("Merge {branch}"))?;
        info!(branch, "merged session into {DEFAULT_BRANCH}");
    }
    Ok(())
}
