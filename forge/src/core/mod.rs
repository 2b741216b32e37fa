//! Deterministic, pure logic shared by the agent and validation stages.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod diff;
pub mod machine;
pub mod paths;
pub mod retry;
pub mod test_case;
pub mod types;
pub mod verdict;
