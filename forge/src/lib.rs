//! Orchestration core for an LLM-driven game generation agent.
//!
//! An LLM proposes tool calls against a sandboxed, copy-on-write workspace,
//! then a three-stage validation pipeline (build, playable, test cases) decides
//! whether the generated game is acceptable. Failures are fed back to the LLM
//! as corrective turns until the retry ceiling is reached.
//!
//! - **[`core`]**: Pure, deterministic logic (paths, routing, verdict parsing, diffs).
//!   No I/O, fully testable in isolation.
//! - **[`workspace`]**: The immutable file tree and its execution sandbox.
//! - **[`io`]**: Side-effecting collaborators (oracles, sessions, git, processes).
//!
//! [`tools`], [`validate`], [`agent`] and [`run`] coordinate core logic with I/O
//! to implement the CLI commands.

pub mod agent;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
pub mod validate;
pub mod workspace;
