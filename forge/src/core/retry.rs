//! Retry counter bookkeeping for validation failures.

/// Bounded retry policy shared by every validation stage.
///
/// A stage failure increments the counter, any stage success resets it, and
/// once the counter reaches `max_retries` the run stops instead of routing
/// back to the LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Counter value after a stage outcome.
    pub fn next_count(current: u32, passed: bool) -> u32 {
        if passed { 0 } else { current.saturating_add(1) }
    }

    pub fn exhausted(&self, count: u32) -> bool {
        count >= self.max_retries
    }
}
