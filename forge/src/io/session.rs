//! Persistent session records under `<games_dir>/<session_id>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::machine::Stop;
use crate::core::types::Turn;

const RECORD_FILE: &str = "session.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
    Interrupted,
    MaxRetriesReached,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Interrupted => "interrupted",
            SessionStatus::MaxRetriesReached => "max_retries_reached",
        }
    }
}

/// One `forge feedback` invocation against an existing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackIteration {
    pub feedback: String,
    pub timestamp: String,
}

/// Snapshot of the run state persisted with the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSummary {
    pub completed: bool,
    pub retry_count: u32,
    pub failures: Vec<String>,
    pub feedback_mode: bool,
    pub task: String,
    pub original_task: String,
    pub transitions: u32,
    pub stop: Option<Stop>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    /// Prompt that created the game.
    pub task: String,
    pub created_at: String,
    pub last_modified: String,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub iterations: Vec<FeedbackIteration>,
    #[serde(default)]
    pub messages: Vec<Turn>,
    #[serde(default)]
    pub run: RunSummary,
    /// Git branch holding the exported game.
    #[serde(default)]
    pub checkpoint: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Filesystem layout of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    root: PathBuf,
}

impl SessionPaths {
    pub fn new(games_dir: &Path, session_id: &str) -> Self {
        Self {
            root: games_dir.join(session_id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record(&self) -> PathBuf {
        self.root.join(RECORD_FILE)
    }

    /// Exported game tree, also a git repository.
    pub fn game_dir(&self) -> PathBuf {
        self.root.join("game")
    }

    pub fn debug_dir(&self) -> PathBuf {
        self.root.join("debug")
    }

    pub fn sandbox_dir(&self) -> PathBuf {
        self.root.join("sandbox")
    }

    pub fn browser_dir(&self) -> PathBuf {
        self.root.join("browser")
    }

    pub fn vision_dir(&self) -> PathBuf {
        self.root.join("vision")
    }
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `YYYYMMDD_HHMMSS_<6 lowercase alphanumerics>`.
pub fn new_session_id(now: DateTime<Utc>) -> String {
    format!("{}_{}", now.format("%Y%m%d_%H%M%S"), generate_short_id())
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

fn check_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        bail!("invalid session id '{session_id}'");
    }
    Ok(())
}

/// Create and persist a fresh in-progress session for `task`.
pub fn create_session(games_dir: &Path, task: &str) -> Result<SessionRecord> {
    let now = Utc::now();
    let mut record = SessionRecord {
        session_id: new_session_id(now),
        task: task.to_string(),
        created_at: timestamp(now),
        last_modified: timestamp(now),
        status: SessionStatus::InProgress,
        iterations: Vec::new(),
        messages: Vec::new(),
        run: RunSummary::default(),
        checkpoint: None,
        last_error: None,
    };
    let paths = SessionPaths::new(games_dir, &record.session_id);
    fs::create_dir_all(paths.game_dir())
        .with_context(|| format!("create directory {}", paths.game_dir().display()))?;
    save_session(games_dir, &mut record)?;
    Ok(record)
}

/// Atomically write the record (temp file + rename), bumping `last_modified`.
pub fn save_session(games_dir: &Path, record: &mut SessionRecord) -> Result<()> {
    check_session_id(&record.session_id)?;
    record.last_modified = timestamp(Utc::now());
    let path = SessionPaths::new(games_dir, &record.session_id).record();
    debug!(path = %path.display(), status = record.status.as_str(), "writing session");
    let mut buf = serde_json::to_string_pretty(record).context("serialize session")?;
    buf.push('\n');
    write_atomic(&path, &buf)
}

pub fn load_session(games_dir: &Path, session_id: &str) -> Result<SessionRecord> {
    check_session_id(session_id)?;
    let path = SessionPaths::new(games_dir, session_id).record();
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read session {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse session {}", path.display()))
}

/// Most recent sessions first, at most `limit`. Unreadable records are skipped.
pub fn list_sessions(games_dir: &Path, limit: usize) -> Result<Vec<SessionRecord>> {
    if !games_dir.exists() {
        return Ok(Vec::new());
    }
    let mut records = Vec::new();
    let entries =
        fs::read_dir(games_dir).with_context(|| format!("read directory {}", games_dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read directory {}", games_dir.display()))?;
        if !entry.path().join(RECORD_FILE).is_file() {
            continue;
        }
        let Some(session_id) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        match load_session(games_dir, &session_id) {
            Ok(record) => records.push(record),
            Err(err) => warn!(session_id = %session_id, err = %format!("{err:#}"), "skipping unreadable session"),
        }
    }
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.session_id.cmp(&a.session_id))
    });
    records.truncate(limit);
    Ok(records)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("session path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp session {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace session {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use regex::Regex;

    #[test]
    fn session_id_has_timestamp_and_lowercase_suffix() {
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let id = new_session_id(now);
        let re = Regex::new(r"^20260304_050607_[a-z0-9]{6}$").unwrap();
        assert!(re.is_match(&id), "unexpected id {id}");
    }

    /// Verifies a record survives save then load with messages and status intact.
    #[test]
    fn session_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut record = create_session(temp.path(), "a racing game").expect("create");
        record.messages.push(Turn::human("a racing game"));
        record.status = SessionStatus::MaxRetriesReached;
        record.run.stop = Some(Stop::RetriesExhausted);
        record.iterations.push(FeedbackIteration {
            feedback: "faster cars".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        });
        save_session(temp.path(), &mut record).expect("save");

        let loaded = load_session(temp.path(), &record.session_id).expect("load");
        assert_eq!(loaded, record);
        assert!(SessionPaths::new(temp.path(), &record.session_id).game_dir().is_dir());
    }

    #[test]
    fn list_returns_newest_first_and_skips_garbage() {
        let temp = tempfile::tempdir().expect("tempdir");
        for (id, created) in [
            ("20260101_000000_aaaaaa", "2026-01-01T00:00:00Z"),
            ("20260103_000000_cccccc", "2026-01-03T00:00:00Z"),
            ("20260102_000000_bbbbbb", "2026-01-02T00:00:00Z"),
        ] {
            let mut record = SessionRecord {
                session_id: id.to_string(),
                task: "t".to_string(),
                created_at: created.to_string(),
                last_modified: created.to_string(),
                status: SessionStatus::Completed,
                iterations: Vec::new(),
                messages: Vec::new(),
                run: RunSummary::default(),
                checkpoint: None,
                last_error: None,
            };
            save_session(temp.path(), &mut record).expect("save");
        }
        let broken = temp.path().join("broken");
        fs::create_dir_all(&broken).expect("mkdir");
        fs::write(broken.join(RECORD_FILE), "{not json").expect("write");

        let listed = list_sessions(temp.path(), 2).expect("list");
        let ids: Vec<&str> = listed.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(ids, vec!["20260103_000000_cccccc", "20260102_000000_bbbbbb"]);
    }

    #[test]
    fn traversal_in_session_id_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_session(temp.path(), "../etc").is_err());
    }

    #[test]
    fn missing_games_dir_lists_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(list_sessions(&temp.path().join("none"), 5).expect("list").is_empty());
    }
}
