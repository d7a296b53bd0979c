//! Backoff calculation for operations that contend on an external lock.
//!
//! The one concrete use in this engine is `git worktree add`, which contends
//! on a single index lock and fails with exit code 128 under contention
//! (§4.3): retry up to 5 times with exponential backoff starting at 100ms.
//! This crate only computes the delay; callers decide how to sleep (this
//! engine sleeps via `tokio::time::sleep`, since the retry loop runs inside
//! async tasks).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff strategy for a bounded sequence of retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry (attempt 2).
    pub base_delay: Duration,
    /// Delay is capped here regardless of attempt number.
    pub max_delay: Duration,
    /// Give up after this many attempts total (including the first).
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// The policy used for worktree-creation retries (§4.3): 100ms base,
    /// 5 attempts, no explicit cap (the delay never grows past ~1.6s within
    /// that attempt budget, so a generous ceiling is used defensively).
    pub const WORKTREE: BackoffPolicy = BackoffPolicy {
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(10),
        max_attempts: 5,
    };

    /// Delay before the given attempt (1-indexed: `delay_for(1)` is the delay
    /// before the *second* attempt, since the first attempt runs immediately).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(2_u32.saturating_pow(pow));
        delay.min(self.max_delay)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worktree_policy_starts_at_100ms() {
        assert_eq!(BackoffPolicy::WORKTREE.delay_for(1), Duration::from_millis(100));
        assert_eq!(BackoffPolicy::WORKTREE.delay_for(2), Duration::from_millis(200));
        assert_eq!(BackoffPolicy::WORKTREE.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn worktree_policy_allows_five_attempts() {
        assert!(BackoffPolicy::WORKTREE.should_retry(1));
        assert!(BackoffPolicy::WORKTREE.should_retry(4));
        assert!(!BackoffPolicy::WORKTREE.should_retry(5));
    }

    #[test]
    fn delay_is_capped() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            max_attempts: 10,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
        assert_eq!(policy.delay_for(10), Duration::from_secs(3));
    }
}
