//! Submission constraints.

use crate::error::CoreError;

/// Steps used when a request omits them.
pub const DEFAULT_STEPS: u32 = 20;

/// Default upper bound on steps per job.
pub const DEFAULT_MAX_STEPS: u32 = 150;

/// Prompts longer than this are rejected.
pub const MAX_PROMPT_LEN: usize = 2000;

/// Trim and check a prompt. Returns the trimmed text.
pub fn validate_prompt(prompt: &str) -> Result<String, CoreError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("prompt must not be empty".into()));
    }
    if trimmed.chars().count() > MAX_PROMPT_LEN {
        return Err(CoreError::Validation(format!(
            "prompt must be at most {MAX_PROMPT_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Check a step count against `1..=max_steps`.
///
/// Takes `i64` so negative values from JSON reach here and get a proper
/// validation message instead of a deserialization error.
pub fn validate_steps(steps: i64, max_steps: u32) -> Result<u32, CoreError> {
    if steps < 1 || steps > i64::from(max_steps) {
        return Err(CoreError::Validation(format!(
            "steps must be between 1 and {max_steps}, got {steps}"
        )));
    }
    // Bounded by max_steps above.
    Ok(steps as u32)
}
