//! Per-record retry with exponential backoff
//!
//! A unit of work reports one of four outcomes. Only [`Outcome::Transient`]
//! is retried; validation and computation failures are deterministic and
//! return on the first attempt.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::{ErrorKind, ProcessingResult, ProcessingStatus};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// What a single attempt at a unit of work produced
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    ValidationFailed(String),
    /// Deterministic numerical failure; retrying would give the same answer
    Computation(String),
    Transient(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    /// At least one attempt is always made
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Delay before attempt `attempt + 1`: `base · 2^(attempt - 1)`
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

/// Final result of running a unit under a [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: ProcessingResult,
    pub value: Option<T>,
    /// How many times the unit was invoked
    pub attempts: u32,
    /// Failure category, `None` on success
    pub kind: Option<ErrorKind>,
}

impl<T> RetryOutcome<T> {
    fn success(value: T, attempts: u32) -> Self {
        Self {
            result: ProcessingResult::success(),
            value: Some(value),
            attempts,
            kind: None,
        }
    }

    fn failed(status: ProcessingStatus, kind: ErrorKind, message: String, attempts: u32) -> Self {
        Self {
            result: ProcessingResult::failure(status, message),
            value: None,
            attempts,
            kind: Some(kind),
        }
    }

    fn cancelled(attempts: u32) -> Self {
        Self::failed(
            ProcessingStatus::Cancelled,
            ErrorKind::Cancelled,
            "Processing cancelled".to_string(),
            attempts,
        )
    }

    pub fn is_success(&self) -> bool {
        self.value.is_some()
    }
}

/// Run `unit` until it succeeds, fails deterministically, exhausts
/// `policy.max_attempts`, or `cancel` fires.
///
/// `unit` receives the 1-based attempt number. The backoff sleep wakes early
/// on cancellation.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut unit: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Outcome<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return RetryOutcome::cancelled(attempt);
        }
        attempt += 1;

        match unit(attempt).await {
            Outcome::Success(value) => return RetryOutcome::success(value, attempt),
            Outcome::ValidationFailed(message) => {
                return RetryOutcome::failed(
                    ProcessingStatus::ValidationFailed,
                    ErrorKind::Validation,
                    message,
                    attempt,
                );
            }
            Outcome::Computation(message) => {
                return RetryOutcome::failed(
                    ProcessingStatus::ComputationFailed,
                    ErrorKind::Computation,
                    message,
                    attempt,
                );
            }
            Outcome::Transient(error) if attempt >= max_attempts => {
                warn!(attempts = attempt, error = %error, "Giving up on record");
                return RetryOutcome::failed(
                    ProcessingStatus::MaxRetriesExceeded,
                    ErrorKind::Transient,
                    format!(
                        "Failed to process record after {} attempts: {:#}",
                        attempt, error
                    ),
                    attempt,
                );
            }
            Outcome::Transient(error) => {
                let backoff = policy.delay(attempt);
                debug!(
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "Transient failure, retrying..."
                );
                tokio::select! {
                    _ = cancel.cancelled() => return RetryOutcome::cancelled(attempt),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}
