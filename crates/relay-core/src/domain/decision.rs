//! Resubmission decisions.
//!
//! This module defines the Decision type (what happens to an entry after a
//! failed attempt) and the Decider trait (how that is determined).

use std::time::Duration;

use super::errors::{ErrorKind, RequestError};
use crate::queue::{QueueEntry, RetryPolicy};

/// What to do with an entry whose latest attempt failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Put the entry back to Pending, claimable after `delay`.
    Retry { delay: Duration, reason: String },

    /// Stop trying. The entry keeps a terminal marker for inspection.
    PermanentFailure { reason: String },
}

impl Decision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Decision::Retry { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Decision::Retry { reason, .. } | Decision::PermanentFailure { reason } => reason,
        }
    }
}

/// Decides the next step for an entry after a failed attempt.
///
/// Deciders are pure: the same entry state and error always give the same
/// verdict, and nothing is mutated. Applying the decision (status change,
/// persistence, wake-up scheduling) is the engine's job.
pub trait Decider: Send + Sync {
    /// # Arguments
    /// * `entry` - the entry, with `attempts` already counting the failed attempt
    /// * `error` - what the attempt reported
    fn decide(&self, entry: &QueueEntry, error: &RequestError) -> Decision;
}

/// Attempt-ceiling plus exponential backoff.
///
/// 1. The request's own `should_attempt_resubmission` is asked first; `false`
///    is final regardless of attempts.
/// 2. `attempts >= max_attempts` is final even for a request that claims
///    retryability.
/// 3. An unclassified failure on the first attempt retries after exactly the
///    base delay.
/// 4. Everything else retries after `RetryPolicy::next_delay(attempts)`.
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
    max_attempts: u32,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy, max_attempts: u32) -> Self {
        Self {
            retry_policy,
            max_attempts,
        }
    }

    /// 5 attempts with the v1 backoff (2s base, 2.0 multiplier).
    pub fn default_v1() -> Self {
        Self::new(RetryPolicy::default_v1(), 5)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, entry: &QueueEntry, error: &RequestError) -> Decision {
        if !entry.request.should_attempt_resubmission(error) {
            return Decision::PermanentFailure {
                reason: format!("{} failure is not resubmittable: {}", error.kind(), error.message()),
            };
        }

        if entry.attempts >= self.max_attempts {
            return Decision::PermanentFailure {
                reason: format!(
                    "max attempts reached: {}/{}",
                    entry.attempts, self.max_attempts
                ),
            };
        }

        let delay = if error.kind() == ErrorKind::Unknown && entry.attempts <= 1 {
            self.retry_policy.base_delay
        } else {
            self.retry_policy.next_delay(entry.attempts)
        };

        Decision::Retry {
            delay,
            reason: format!(
                "retry attempt {}/{} after {:?}",
                entry.attempts + 1,
                self.max_attempts,
                delay
            ),
        }
    }
}
