//! Operation timing
//!
//! Named operations accumulate a call count and total wall time. Calls that run
//! longer than the slow threshold are logged as warnings.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(1000);

/// Accumulated timings for one operation name, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub avg_ms: f64,
}

impl OperationMetrics {
    fn observe(&mut self, elapsed_ms: u64) {
        self.min_ms = if self.count == 0 {
            elapsed_ms
        } else {
            self.min_ms.min(elapsed_ms)
        };
        self.max_ms = self.max_ms.max(elapsed_ms);
        self.count += 1;
        self.total_ms = self.total_ms.saturating_add(elapsed_ms);
        self.avg_ms = self.total_ms as f64 / self.count as f64;
    }
}

/// Thread-safe registry of operation timings, shared behind an `Arc`
#[derive(Debug)]
pub struct MetricsTracker {
    operations: Mutex<HashMap<String, OperationMetrics>>,
    slow_threshold: Duration,
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SLOW_THRESHOLD)
    }
}

impl MetricsTracker {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            operations: Mutex::new(HashMap::new()),
            slow_threshold,
        }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OperationMetrics>> {
        self.operations.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add one observation of `operation`
    pub fn record(&self, operation: &str, elapsed_ms: u64) {
        self.lock()
            .entry(operation.to_string())
            .or_default()
            .observe(elapsed_ms);

        let threshold_ms = self.slow_threshold.as_millis() as u64;
        if elapsed_ms > threshold_ms {
            warn!(
                operation = operation,
                elapsed_ms = elapsed_ms,
                threshold_ms = threshold_ms,
                "Slow operation"
            );
        } else {
            debug!(operation = operation, elapsed_ms = elapsed_ms, "Operation timed");
        }
    }

    pub fn get(&self, operation: &str) -> Option<OperationMetrics> {
        self.lock().get(operation).copied()
    }

    /// Copy of every operation's metrics, ordered by name
    pub fn snapshot(&self) -> BTreeMap<String, OperationMetrics> {
        self.lock()
            .iter()
            .map(|(name, metrics)| (name.clone(), *metrics))
            .collect()
    }

    /// Await `future` and record its wall time under `operation`
    pub async fn track<F, T>(&self, operation: &str, future: F) -> T
    where
        F: Future<Output = T>,
    {
        let start = Instant::now();
        let output = future.await;
        self.record(operation, start.elapsed().as_millis() as u64);
        output
    }
}
