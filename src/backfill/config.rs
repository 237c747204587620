//! Backfill retry configuration and constants

use std::time::Duration;

/// Attempts per stage call, including the first
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Initial backoff delay in milliseconds
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds
pub const MAX_BACKOFF_MS: u64 = 30_000; // 30 seconds

/// Highest retry count a period may reach across runs before it is
/// considered exhausted
pub const DEFAULT_MAX_PERIOD_RETRIES: u32 = 3;

/// Per-call timeout for an extractor or transformer
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 300;

/// Calculate exponential backoff delay for the given retry (0-based)
pub fn calculate_backoff(retry: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(retry);
    initial.saturating_mul(factor).min(max)
}

/// How a single stage is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per stage, at least 1
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on any delay
    pub max_backoff: Duration,
    /// Per-call timeout
    pub stage_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            stage_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without sleeping
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Set the attempt ceiling (clamped to at least 1)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the initial backoff
    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    /// Set the per-call timeout
    pub fn with_stage_timeout(mut self, stage_timeout: Duration) -> Self {
        self.stage_timeout = stage_timeout;
        self
    }

    /// Delay after the `attempt`-th failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt.saturating_sub(1),
            self.initial_backoff,
            self.max_backoff,
        )
    }
}

/// Settings for one orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillConfig {
    /// Stage retry policy
    pub retry: RetryPolicy,
    /// Period retry ceiling
    pub max_period_retries: u32,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_period_retries: DEFAULT_MAX_PERIOD_RETRIES,
        }
    }
}
