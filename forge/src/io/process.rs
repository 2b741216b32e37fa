//! Child process execution with a deadline and bounded output capture.

use std::ffi::OsStr;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

type Captured = Result<(Vec<u8>, usize)>;

/// Output of a finished (or killed) child process.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes dropped from stdout once the limit was reached.
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        truncation_notice(label, "stdout", self.stdout_truncated)
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        truncation_notice(label, "stderr", self.stderr_truncated)
    }
}

fn truncation_notice(label: &str, stream: &str, bytes: usize) -> String {
    if bytes == 0 {
        return String::new();
    }
    format!("\n[{label} {stream} truncated {bytes} bytes]\n")
}

/// Build a [`Command`] from an argv vector.
pub fn command_from_argv(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command must be a non-empty array"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// External command that must exit zero within its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedCommand {
    pub argv: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CheckedCommand {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            argv,
            timeout,
            output_limit_bytes,
        }
    }

    fn label(&self) -> &str {
        self.argv.first().map_or("command", String::as_str)
    }

    /// Run with `extra_args` appended. Timeouts and non-zero exits are errors.
    pub fn run<S: AsRef<OsStr>>(
        &self,
        extra_args: &[S],
        stdin: Option<&[u8]>,
        workdir: Option<&Path>,
    ) -> Result<CommandOutput> {
        let mut cmd = command_from_argv(&self.argv)?;
        cmd.args(extra_args);
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }
        let output = run_command_with_timeout(cmd, stdin, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {}", self.label()))?;
        if output.timed_out {
            return Err(anyhow!("{} timed out after {:?}", self.label(), self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), program = self.label(), "command failed");
            return Err(anyhow!(
                "{} failed with status {:?}: {}",
                self.label(),
                output.status.code(),
                output.stderr_lossy().trim()
            ));
        }
        Ok(output)
    }
}

/// Run `cmd` to completion or until `timeout` elapses, then kill it.
///
/// Both pipes are drained on background threads while the child runs so a
/// chatty child never blocks on a full pipe. At most `output_limit_bytes` of
/// each stream is kept in memory.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, program = ?cmd.get_program(), "failed to spawn command");
        anyhow!(err).context(format!("spawn {:?}", cmd.get_program()))
    })?;

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_reader = spawn_reader(stdout, output_limit_bytes);
    let stderr_reader = spawn_reader(stderr, output_limit_bytes);

    if let Some(input) = stdin {
        let mut pipe = child.stdin.take().ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading its input is not an error here.
        if let Err(err) = pipe.write_all(input) {
            warn!(err = %err, "child closed stdin early");
        }
    }

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_reader).context("join stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_reader).context("join stderr")?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> JoinHandle<Captured> {
    thread::spawn(move || read_limited(reader, limit))
}

fn join_reader(handle: JoinHandle<Captured>) -> Captured {
    handle
        .join()
        .unwrap_or_else(|_| Err(anyhow!("output reader thread panicked")))
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Captured {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok((kept, dropped));
        }
        let keep = n.min(limit.saturating_sub(kept.len()));
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_limited_counts_dropped_bytes() {
        let (kept, dropped) = read_limited(&b"abcdefgh"[..], 3).expect("read");
        assert_eq!(kept, b"abc");
        assert_eq!(dropped, 5);
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(command_from_argv(&[]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn pipes_stdin_through_child() {
        let cmd = command_from_argv(&["cat".to_string()]).expect("cmd");
        let out = run_command_with_timeout(cmd, Some(b"hello"), Duration::from_secs(10), 1024)
            .expect("run");
        assert!(out.succeeded());
        assert_eq!(out.stdout_lossy(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn checked_command_rejects_non_zero_exit() {
        let command = CheckedCommand::new(
            vec!["sh".to_string(), "-c".to_string()],
            Duration::from_secs(10),
            1024,
        );
        let err = command
            .run(&["echo nope >&2; exit 4"], None, None)
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("status Some(4)"));
        assert!(message.contains("nope"));
    }

    #[cfg(unix)]
    #[test]
    fn kills_child_after_timeout() {
        let cmd = command_from_argv(&["sleep".to_string(), "5".to_string()]).expect("cmd");
        let out = run_command_with_timeout(cmd, None, Duration::from_millis(100), 1024).expect("run");
        assert!(out.timed_out);
        assert!(!out.succeeded());
    }
}
