//! Background job model shared by producers, the queue and its workers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::TransferFilters;

/// Queue consumed by the transfer processing worker
pub const TRANSFER_PROCESSING_QUEUE: &str = "transfer-processing";

/// Queue consumed by the cleanup worker
pub const CLEANUP_QUEUE: &str = "cleanup";

/// Retry delays never exceed this
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Delay policy between delivery attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`
    Exponential(Duration),
}

impl Backoff {
    /// Delay before retrying after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match *self {
            Self::Fixed(d) => d,
            Self::Exponential(base) => {
                let exp = attempt.saturating_sub(1).min(16);
                base.saturating_mul(2u32.pow(exp))
            }
        };
        delay.min(MAX_BACKOFF)
    }
}

/// Per-job delivery options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Total delivery attempts, including the first
    pub attempts: u32,
    pub backoff: Backoff,
}

impl JobOptions {
    pub fn transfer_processing() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::Exponential(Duration::from_secs(2)),
        }
    }

    pub fn cleanup() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::Exponential(Duration::from_secs(5)),
        }
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::transfer_processing()
    }
}

/// A job as delivered to a handler
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub payload: Value,
    /// 1-based delivery attempt
    pub attempt: u32,
    pub options: JobOptions,
}

impl Job {
    /// Decode the payload into a typed job body.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, super::AppError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| super::QueueError::Payload(format!("job {}: {}", self.id, e)).into())
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.options.attempts
    }
}

/// Payload of a transfer processing job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferProcessingJob {
    pub transfer_id: String,
}

/// Payload of a cleanup job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupJob {
    /// Most recent matching transfers to keep
    pub keep_last_n: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<TransferFilters>,
}

/// Outcome of one cleanup run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupReport {
    pub matched: usize,
    pub deleted: usize,
    pub kept: usize,
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let backoff = Backoff::Exponential(Duration::from_secs(2));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_for(40), MAX_BACKOFF);
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed(Duration::from_millis(250));
        assert_eq!(backoff.delay_for(1), backoff.delay_for(5));
    }

    #[test]
    fn test_decode_bad_payload_is_permanent() {
        let job = Job {
            id: "j1".into(),
            queue: TRANSFER_PROCESSING_QUEUE.into(),
            payload: serde_json::json!({"nope": 1}),
            attempt: 1,
            options: JobOptions::default(),
        };
        let err = job.decode::<TransferProcessingJob>().unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_cleanup_payload_defaults() {
        let job: CleanupJob = serde_json::from_value(serde_json::json!({"keep_last_n": 3})).unwrap();
        assert_eq!(job.keep_last_n, 3);
        assert!(job.filters.is_none());
    }
}
