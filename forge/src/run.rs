//! Session-level entry points used by the CLI.
//!
//! A session owns a game directory. [`begin_creation`] and [`begin_feedback`]
//! build the initial [`RunState`]; [`run_session`] drives the agent, exports
//! the final tree, checkpoints it in git and persists the session record.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::agent::{Agent, AgentConfig, Oracles, RunState};
use crate::core::machine::Stop;
use crate::core::types::Conversation;
use crate::io::config::ForgeConfig;
use crate::io::git::{commit_checkpoint, prepare_session_branch};
use crate::io::session::{
    FeedbackIteration, SessionPaths, SessionRecord, SessionStatus, save_session, timestamp,
};
use crate::workspace::{Sandbox, Workspace, read_tree};

/// What the caller learns once a session run is over.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub stop: Stop,
    /// Workspace diff against the snapshot the run started from.
    pub diff: String,
    pub game_dir: PathBuf,
    pub last_error: Option<String>,
}

/// Initial state for a brand new game, optionally seeded from `context_dir`.
pub fn begin_creation(
    cfg: &ForgeConfig,
    record: &SessionRecord,
    context_dir: Option<&Path>,
    sandbox: Arc<dyn Sandbox>,
) -> Result<RunState> {
    let base = match context_dir {
        Some(dir) => {
            if !dir.is_dir() {
                bail!("context directory {} does not exist", dir.display());
            }
            read_tree(dir, &cfg.workspace.ignore)
                .with_context(|| format!("load context {}", dir.display()))?
        }
        None => Default::default(),
    };
    info!(files = base.len(), "seeded workspace");
    let workspace = Workspace::new(base, cfg.workspace.policy(), sandbox);
    RunState::creation(&record.task, workspace)
}

/// Initial state for applying `feedback` to the session's existing game.
pub fn begin_feedback(
    cfg: &ForgeConfig,
    record: &mut SessionRecord,
    feedback: &str,
    sandbox: Arc<dyn Sandbox>,
) -> Result<RunState> {
    let feedback = feedback.trim();
    if feedback.is_empty() {
        bail!("feedback must not be empty");
    }
    let game_dir = SessionPaths::new(&cfg.games_dir, &record.session_id).game_dir();
    if !game_dir.is_dir() {
        bail!("session {} has no game directory at {}", record.session_id, game_dir.display());
    }
    let base = read_tree(&game_dir, &cfg.workspace.ignore)
        .with_context(|| format!("load game {}", game_dir.display()))?;
    record.iterations.push(FeedbackIteration {
        feedback: feedback.to_string(),
        timestamp: timestamp(Utc::now()),
    });
    info!(
        session_id = %record.session_id,
        files = base.len(),
        iteration = record.iterations.len(),
        "resuming session with feedback"
    );
    let workspace = Workspace::new(base, cfg.workspace.policy(), sandbox);
    let conversation = Conversation::from_turns(record.messages.clone());
    RunState::feedback(&record.task, feedback, conversation, workspace)
}

/// Drive the agent to a terminal state and persist everything it produced.
#[instrument(skip_all, fields(session_id = %record.session_id))]
pub fn run_session(
    cfg: &ForgeConfig,
    mut record: SessionRecord,
    run: RunState,
    oracles: Oracles<'_>,
) -> Result<RunReport> {
    let paths = SessionPaths::new(&cfg.games_dir, &record.session_id);
    let game_dir = paths.game_dir();
    let branch = match prepare_session_branch(&game_dir, &record.session_id) {
        Ok(branch) => Some(branch),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "git checkpoints disabled for this run");
            None
        }
    };
    record.status = SessionStatus::InProgress;
    record.last_error = None;
    save_session(&cfg.games_dir, &mut record)?;

    let mut agent = Agent::new(oracles, AgentConfig::from_config(cfg, Some(paths.debug_dir())));
    let outcome = agent.run(run);
    let (mut status, mut last_error) = session_status(&outcome.stop, &outcome.run.failures);

    let exported = outcome.run.workspace.export(&game_dir, &cfg.workspace.ignore);
    if let Err(err) = &exported {
        status = SessionStatus::Failed;
        last_error = Some(format!("export game: {err:#}"));
    }

    if exported.is_ok()
        && let Some(branch) = &branch
    {
        let message = format!("{}: {}", status.as_str(), outcome.run.task);
        let merge = status == SessionStatus::Completed;
        if let Err(err) = commit_checkpoint(&game_dir, branch, &message, merge) {
            warn!(err = %format!("{err:#}"), "git checkpoint failed");
        }
        record.checkpoint = Some(branch.clone());
    }

    record.messages = outcome.run.conversation.turns().to_vec();
    record.run = outcome.run.summary(outcome.transitions, Some(outcome.stop.clone()));
    record.status = status;
    record.last_error = last_error.clone();
    save_session(&cfg.games_dir, &mut record)?;
    exported.with_context(|| format!("export game to {}", game_dir.display()))?;

    info!(status = status.as_str(), transitions = outcome.transitions, "session saved");
    Ok(RunReport {
        session_id: record.session_id,
        status,
        stop: outcome.stop,
        diff: outcome.run.workspace.diff(),
        game_dir,
        last_error,
    })
}

/// Persisted status and last error for a terminal stop.
///
/// An exhausted retry budget reports the most recent validation failure.
pub fn session_status(stop: &Stop, failures: &[String]) -> (SessionStatus, Option<String>) {
    match stop {
        Stop::Validated => (SessionStatus::Completed, None),
        Stop::RetriesExhausted => (SessionStatus::MaxRetriesReached, failures.last().cloned()),
        Stop::Interrupted => (SessionStatus::Interrupted, None),
        Stop::AgentStopped => (
            SessionStatus::Failed,
            Some("agent stopped without completing".to_string()),
        ),
        Stop::TransitionLimit { limit } => (
            SessionStatus::Failed,
            Some(format!("transition limit reached ({limit})")),
        ),
        Stop::Errored { message } => (SessionStatus::Failed, Some(message.clone())),
    }
}
