//! Segment fetch errors and retry policy
//!
//! Per-segment transport failures never escape the orchestrator: they are
//! retried here with exponential backoff and jitter, and a segment that is
//! still failing afterwards is recorded as missing.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default base delay for exponential backoff
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Maximum delay cap for exponential backoff
pub const MAX_DELAY_CAP: Duration = Duration::from_secs(5);

/// Transport-level failure of a single fetch attempt
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum FetchError {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Client errors other than timeouts and rate limits will not change on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status(code) => !(400..500).contains(code) || *code == 408 || *code == 429,
            Self::Transport(_) | Self::Timeout => true,
            Self::Cancelled => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if let Some(status) = error.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Retry strategy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for exponential)
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 to 1.0), 0 disables jitter
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: MAX_DELAY_CAP,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt follows the failed `attempt` (1-based)
    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> bool {
        error.is_retryable() && attempt <= self.max_retries
    }

    /// Delay before the attempt following the failed `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let mut delay = Duration::from_millis(delay_ms as u64);

        if delay > self.max_delay {
            delay = self.max_delay;
        }

        if self.jitter_factor > 0.0 {
            let jitter =
                delay.as_millis() as f64 * self.jitter_factor * (rand::random::<f64>() - 0.5);
            let jittered_delay = delay.as_millis() as i64 + jitter as i64;
            delay = Duration::from_millis(jittered_delay.max(0) as u64);
        }

        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::Status(500).is_retryable());
        assert!(FetchError::Status(503).is_retryable());
        assert!(FetchError::Status(429).is_retryable());
        assert!(FetchError::Status(408).is_retryable());
        assert!(!FetchError::Status(404).is_retryable());
        assert!(!FetchError::Status(403).is_retryable());
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::Transport("reset".into()).is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
    }

    #[test]
    fn test_should_retry_is_bounded() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..Default::default()
        };
        assert!(policy.should_retry(&FetchError::Timeout, 1));
        assert!(policy.should_retry(&FetchError::Timeout, 2));
        assert!(!policy.should_retry(&FetchError::Timeout, 3));
        assert!(!policy.should_retry(&FetchError::Status(404), 1));
    }

    #[test]
    fn test_exponential_backoff_with_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(10), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.2,
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1).as_millis();
            assert!((900..=1100).contains(&delay), "delay out of range: {}", delay);
        }
    }
}
