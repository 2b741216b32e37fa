//! Stable exit codes for forge CLI commands.

/// The run ended with every validation stage passing, or a read-only command succeeded.
pub const OK: i32 = 0;
/// Invalid config, unknown session, or an error that aborted the run.
pub const INVALID: i32 = 1;
/// Validation kept failing until the retry ceiling was reached.
pub const RETRIES_EXHAUSTED: i32 = 2;
/// The agent stopped without completing (plain reply, user quit, or transition ceiling).
pub const STOPPED: i32 = 3;
