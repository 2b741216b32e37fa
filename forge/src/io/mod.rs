//! Side-effecting collaborators: oracles, sessions, git, and child processes.

pub mod browser;
pub mod config;
pub mod debug_log;
pub mod git;
pub mod human;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod session;
pub mod vision;
