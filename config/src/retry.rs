//! The retry policy `push-providers` falls back to on a `ProviderError`.
//!
//! Unlike the rest of this crate, this is not overlaid from the
//! environment or `~/.push/config.json` — retry behavior is part of the
//! agent core's wire contract, not a per-deployment tunable.

use std::time::Duration;

/// `max_retries` extra attempts after the initial request, each preceded
/// by the delay at the matching index in `backoff`. Once `backoff_step`
/// runs past the schedule, the last entry repeats.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, backoff: vec![Duration::from_secs(1), Duration::from_secs(3)] }
    }
}

impl RetryPolicy {
    /// The delay to wait before the attempt that follows `backoff_step`
    /// failures (0 before the first retry, 1 before the second, ...).
    #[must_use]
    pub fn delay_for(&self, backoff_step: u32) -> Duration {
        let idx = (backoff_step as usize).min(self.backoff.len().saturating_sub(1));
        self.backoff.get(idx).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_the_spec_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(3));
    }

    #[test]
    fn delay_for_repeats_the_last_entry_past_the_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(5), Duration::from_secs(3));
    }
}
