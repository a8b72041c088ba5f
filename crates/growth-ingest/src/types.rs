//! Result and error-tally types shared by the retry executor and orchestrator

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Outcome category of a batch or of a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Success,
    PartialFailure,
    ValidationFailed,
    MaxRetriesExceeded,
    ComputationFailed,
    Cancelled,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Success => "success",
            ProcessingStatus::PartialFailure => "partial_failure",
            ProcessingStatus::ValidationFailed => "validation_failed",
            ProcessingStatus::MaxRetriesExceeded => "max_retries_exceeded",
            ProcessingStatus::ComputationFailed => "computation_failed",
            ProcessingStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one record attempt or one whole batch. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub status: ProcessingStatus,
    pub processed_records: usize,
    pub failed_records: usize,
    pub error_message: Option<String>,
    pub error_summary: String,
}

impl ProcessingResult {
    pub fn success() -> Self {
        Self {
            status: ProcessingStatus::Success,
            processed_records: 1,
            failed_records: 0,
            error_message: None,
            error_summary: String::new(),
        }
    }

    pub fn failure(status: ProcessingStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            processed_records: 0,
            failed_records: 1,
            error_message: Some(message.into()),
            error_summary: String::new(),
        }
    }

    /// Aggregate status for a batch: `Success` only when nothing failed
    pub fn batch(processed: usize, failed: usize, error_summary: String) -> Self {
        Self {
            status: if failed == 0 {
                ProcessingStatus::Success
            } else {
                ProcessingStatus::PartialFailure
            },
            processed_records: processed,
            failed_records: failed,
            error_message: None,
            error_summary,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ProcessingStatus::Success
    }

    pub fn total_records(&self) -> usize {
        self.processed_records + self.failed_records
    }
}

/// Why a record ended up in the failure set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Computation,
    /// Transient failures that exhausted every retry
    Transient,
    Cancelled,
    Panic,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Validation",
            ErrorKind::Computation => "Computation",
            ErrorKind::Transient => "Transient",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Panic => "Panic",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind failure counts for one batch, kept in first-seen order
#[derive(Debug, Default)]
pub struct ErrorTracker {
    counts: Mutex<Vec<(ErrorKind, usize)>>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ErrorKind, usize)>> {
        // Counts stay consistent even if a holder panicked mid-update
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, kind: ErrorKind) {
        self.record_many(kind, 1);
    }

    pub fn record_many(&self, kind: ErrorKind, count: usize) {
        if count == 0 {
            return;
        }
        let mut counts = self.lock();
        match counts.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, n)) => *n += count,
            None => counts.push((kind, count)),
        }
    }

    pub fn count(&self, kind: ErrorKind) -> usize {
        self.lock()
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    pub fn counts(&self) -> Vec<(ErrorKind, usize)> {
        self.lock().clone()
    }

    pub fn total(&self) -> usize {
        self.lock().iter().map(|(_, n)| n).sum()
    }

    /// `"Validation: 10 occurrences, Transient: 2 occurrences"`
    pub fn summary(&self) -> String {
        self.lock()
            .iter()
            .map(|(kind, n)| format!("{}: {} occurrences", kind, n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_summary_keeps_first_seen_order() {
        let tracker = ErrorTracker::new();
        tracker.record(ErrorKind::Transient);
        tracker.record(ErrorKind::Validation);
        tracker.record(ErrorKind::Transient);
        tracker.record_many(ErrorKind::Cancelled, 0);

        assert_eq!(
            tracker.summary(),
            "Transient: 2 occurrences, Validation: 1 occurrences"
        );
        assert_eq!(tracker.count(ErrorKind::Cancelled), 0);
        assert_eq!(tracker.total(), 3);
    }

    #[test]
    fn test_concurrent_recording_is_exact() {
        let tracker = Arc::new(ErrorTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        tracker.record(ErrorKind::Validation);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tracker.count(ErrorKind::Validation), 4000);
    }

    #[test]
    fn test_batch_status() {
        assert_eq!(ProcessingResult::batch(5, 0, String::new()).status, ProcessingStatus::Success);
        let partial = ProcessingResult::batch(90, 10, "Validation: 10 occurrences".into());
        assert_eq!(partial.status, ProcessingStatus::PartialFailure);
        assert_eq!(partial.total_records(), 100);
    }
}
