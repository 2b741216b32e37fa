//! `forge`: generate and iterate on small browser games with an LLM agent.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use forge::agent::Oracles;
use forge::exit_codes;
use forge::io::browser::ScriptBrowser;
use forge::io::config::{ForgeConfig, load_config, write_config};
use forge::io::human::{Human, StdinHuman};
use forge::io::llm::CommandLlm;
use forge::io::process::CheckedCommand;
use forge::io::session::{
    SessionPaths, SessionRecord, SessionStatus, create_session, list_sessions, load_session,
};
use forge::io::vision::CommandVision;
use forge::run::{RunReport, begin_creation, begin_feedback, run_session};
use forge::workspace::LocalSandbox;

#[derive(Parser)]
#[command(name = "forge", version, about = "LLM agent that builds and validates browser games")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "forge.toml")]
    config: PathBuf,
    /// Log progress at info level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Start a new game session from a prompt.
    New {
        prompt: String,
        /// Existing project files to seed the workspace with.
        #[arg(long)]
        context_dir: Option<PathBuf>,
    },
    /// Apply feedback to an existing session.
    Feedback { session_id: String, feedback: String },
    /// List recent sessions, newest first.
    Sessions {
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

fn main() {
    let cli = Cli::parse();
    forge::logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::New {
            prompt,
            context_dir,
        } => {
            let cfg = load_config(&cli.config)?;
            cmd_new(&cfg, &prompt, context_dir.as_deref())
        }
        Command::Feedback {
            session_id,
            feedback,
        } => {
            let cfg = load_config(&cli.config)?;
            cmd_feedback(&cfg, &session_id, &feedback)
        }
        Command::Sessions { limit } => {
            let cfg = load_config(&cli.config)?;
            cmd_sessions(&cfg, limit)
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &ForgeConfig::default())?;
    println!("init: wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_new(cfg: &ForgeConfig, prompt: &str, context_dir: Option<&Path>) -> Result<i32> {
    if prompt.trim().is_empty() {
        bail!("prompt must not be empty");
    }
    let record = create_session(&cfg.games_dir, prompt.trim())?;
    println!("session: {}", record.session_id);
    let backends = Backends::new(cfg, &record);
    let run = begin_creation(cfg, &record, context_dir, backends.sandbox.clone())?;
    let report = run_session(cfg, record, run, backends.oracles(cfg))?;
    Ok(print_report(&report))
}

fn cmd_feedback(cfg: &ForgeConfig, session_id: &str, feedback: &str) -> Result<i32> {
    let mut record = load_session(&cfg.games_dir, session_id)
        .with_context(|| format!("load session {session_id}"))?;
    let backends = Backends::new(cfg, &record);
    let run = begin_feedback(cfg, &mut record, feedback, backends.sandbox.clone())?;
    let report = run_session(cfg, record, run, backends.oracles(cfg))?;
    Ok(print_report(&report))
}

fn cmd_sessions(cfg: &ForgeConfig, limit: usize) -> Result<i32> {
    let sessions = list_sessions(&cfg.games_dir, limit)?;
    if sessions.is_empty() {
        println!("sessions: none in {}", cfg.games_dir.display());
    }
    for record in sessions {
        println!(
            "{} {} iterations={} task={}",
            record.session_id,
            record.status.as_str(),
            record.iterations.len(),
            first_line(&record.task)
        );
    }
    Ok(exit_codes::OK)
}

/// Command-backed collaborators scoped to one session directory.
struct Backends {
    sandbox: Arc<LocalSandbox>,
    llm: CommandLlm,
    vision: CommandVision,
    browser: ScriptBrowser,
    human: StdinHuman,
}

impl Backends {
    fn new(cfg: &ForgeConfig, record: &SessionRecord) -> Self {
        let paths = SessionPaths::new(&cfg.games_dir, &record.session_id);
        let oracle = |argv: &[String]| {
            CheckedCommand::new(
                argv.to_vec(),
                cfg.oracle_timeout(),
                cfg.oracles.output_limit_bytes,
            )
        };
        Self {
            sandbox: Arc::new(LocalSandbox::new(
                paths.sandbox_dir(),
                cfg.workspace.exec_timeout(),
                cfg.workspace.output_limit_bytes,
                cfg.workspace.ignore.clone(),
            )),
            llm: CommandLlm::new(oracle(&cfg.oracles.llm_command)),
            vision: CommandVision::new(oracle(&cfg.oracles.vision_command), paths.vision_dir()),
            browser: ScriptBrowser::new(oracle(&cfg.oracles.browser_command), paths.browser_dir()),
            human: StdinHuman,
        }
    }

    fn oracles(&self, cfg: &ForgeConfig) -> Oracles<'_> {
        Oracles {
            llm: &self.llm,
            vision: &self.vision,
            browser: &self.browser,
            human: cfg.interactive.then_some(&self.human as &dyn Human),
        }
    }
}

fn print_report(report: &RunReport) -> i32 {
    if !report.diff.is_empty() {
        println!("{}", report.diff.trim_end());
    }
    println!(
        "run: session={} status={} game={}",
        report.session_id,
        report.status.as_str(),
        report.game_dir.display()
    );
    if let Some(err) = &report.last_error {
        eprintln!("error: {err}");
    }
    exit_code(report.status)
}

fn exit_code(status: SessionStatus) -> i32 {
    match status {
        SessionStatus::Completed => exit_codes::OK,
        SessionStatus::MaxRetriesReached => exit_codes::RETRIES_EXHAUSTED,
        SessionStatus::Failed | SessionStatus::Interrupted => exit_codes::STOPPED,
        SessionStatus::InProgress => exit_codes::INVALID,
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_new_with_context_dir() {
        let cli = Cli::parse_from(["forge", "new", "a snake game", "--context-dir", "assets"]);
        match cli.command {
            Command::New {
                prompt,
                context_dir,
            } => {
                assert_eq!(prompt, "a snake game");
                assert_eq!(context_dir, Some(PathBuf::from("assets")));
            }
            _ => panic!("expected new"),
        }
        assert_eq!(cli.config, PathBuf::from("forge.toml"));
    }

    #[test]
    fn parse_feedback_with_global_flags() {
        let cli = Cli::parse_from([
            "forge",
            "feedback",
            "20260101_000000_abc123",
            "faster paddle",
            "--config",
            "custom.toml",
            "-v",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert!(matches!(
            cli.command,
            Command::Feedback { ref session_id, ref feedback }
                if session_id == "20260101_000000_abc123" && feedback == "faster paddle"
        ));
    }

    #[test]
    fn parse_sessions_default_limit() {
        let cli = Cli::parse_from(["forge", "sessions"]);
        assert!(matches!(cli.command, Command::Sessions { limit: 5 }));
    }

    #[test]
    fn statuses_map_to_exit_codes() {
        assert_eq!(exit_code(SessionStatus::Completed), exit_codes::OK);
        assert_eq!(
            exit_code(SessionStatus::MaxRetriesReached),
            exit_codes::RETRIES_EXHAUSTED
        );
        assert_eq!(exit_code(SessionStatus::Interrupted), exit_codes::STOPPED);
    }

    #[test]
    fn first_line_of_multiline_task() {
        assert_eq!(first_line("snake\nwith walls"), "snake");
        assert_eq!(first_line(""), "");
    }
}
