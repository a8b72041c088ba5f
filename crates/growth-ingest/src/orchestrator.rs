//! Parallel batch processing
//!
//! Records flow from a producer task through a bounded channel to a fixed pool
//! of workers. Each worker validates the record, runs the caller's step under
//! the retry policy and folds the outcome into its local tallies. A panic in a
//! step is caught and counted; it never takes down a worker or the batch.
//!
//! Every input record is accounted for exactly once: it either succeeds, fails
//! with an [`ErrorKind`], or (if cancellation stopped dispatch first) is
//! counted as [`ErrorKind::Cancelled`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::metrics::MetricsTracker;
use crate::retry::{execute_with_retry, Outcome, RetryPolicy};
use crate::types::{ErrorKind, ErrorTracker, ProcessingResult};
use crate::validator::{validate, validation_errors, ValidatedRecord};
use growth_common::types::GrowthStandardRecord;

/// Aggregate result of one batch plus every successful step output
#[derive(Debug, Serialize)]
pub struct BatchReport<T> {
    pub result: ProcessingResult,
    pub outputs: Vec<T>,
    /// Failure counts per kind, in first-seen order
    pub error_counts: Vec<(ErrorKind, usize)>,
}

impl<T> BatchReport<T> {
    pub fn failures(&self, kind: ErrorKind) -> usize {
        self.error_counts
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

/// Tallies owned by one worker, merged after the pool drains
struct WorkerTally<T> {
    outputs: Vec<T>,
    failed: usize,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    max_parallelism: usize,
    retry_policy: RetryPolicy,
    metrics: Arc<MetricsTracker>,
}

impl BatchOrchestrator {
    pub fn new(max_parallelism: usize, retry_policy: RetryPolicy, metrics: Arc<MetricsTracker>) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
            retry_policy,
            metrics,
        }
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn metrics(&self) -> &Arc<MetricsTracker> {
        &self.metrics
    }

    /// Validate and process every record with `step`.
    ///
    /// `step` receives the validated record and the 1-based attempt number.
    /// Invalid records never reach it. On cancellation, results completed so
    /// far are kept and the rest are counted as cancelled.
    #[instrument(skip_all, fields(records = records.len(), workers = self.max_parallelism))]
    pub async fn process_records_parallel<T, S, Fut>(
        &self,
        records: Vec<GrowthStandardRecord>,
        step: S,
        cancel: CancellationToken,
    ) -> BatchReport<T>
    where
        T: Send + 'static,
        S: Fn(ValidatedRecord, u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        let start = Instant::now();
        let total = records.len();
        let workers = self.max_parallelism.min(total.max(1));

        let (sender, receiver) = mpsc::channel::<GrowthStandardRecord>(workers);
        let receiver = Arc::new(Mutex::new(receiver));
        let tracker = Arc::new(ErrorTracker::new());
        let step = Arc::new(step);

        let producer_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            for record in records {
                tokio::select! {
                    biased;
                    _ = producer_cancel.cancelled() => break,
                    sent = sender.send(record) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let receiver = receiver.clone();
            let tracker = tracker.clone();
            let step = step.clone();
            let cancel = cancel.clone();
            let policy = self.retry_policy;
            let metrics = self.metrics.clone();

            pool.spawn(async move {
                let mut tally = WorkerTally {
                    outputs: Vec::new(),
                    failed: 0,
                };

                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some(record) = next else { break };

                    let unit = |attempt: u32| {
                        let step = step.clone();
                        async move {
                            match validate(&record) {
                                Some(validated) => (*step)(validated, attempt).await,
                                None => Outcome::ValidationFailed(validation_errors(&record).join("; ")),
                            }
                        }
                    };

                    let run = metrics.track("process_record", execute_with_retry(&policy, &cancel, unit));
                    match AssertUnwindSafe(run).catch_unwind().await {
                        Ok(outcome) => match (outcome.value, outcome.kind) {
                            (Some(value), _) => tally.outputs.push(value),
                            (None, kind) => {
                                tracker.record(kind.unwrap_or(ErrorKind::Transient));
                                tally.failed += 1;
                            }
                        },
                        Err(payload) => {
                            error!(
                                worker = worker_id,
                                age = record.age,
                                panic = %panic_message(payload.as_ref()),
                                "Record processing panicked"
                            );
                            tracker.record(ErrorKind::Panic);
                            tally.failed += 1;
                        }
                    }
                }

                tally
            });
        }

        let mut outputs = Vec::new();
        let mut failed = 0usize;
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(tally) => {
                    outputs.extend(tally.outputs);
                    failed += tally.failed;
                }
                Err(join_err) => error!("Batch worker failed: {}", join_err),
            }
        }
        if let Err(join_err) = producer.await {
            error!("Batch producer failed: {}", join_err);
        }

        // Records never handled by a worker: not dispatched before cancel,
        // or lost with a worker that failed outside the panic guard
        let unaccounted = total.saturating_sub(outputs.len() + failed);
        if unaccounted > 0 {
            let kind = if cancel.is_cancelled() {
                ErrorKind::Cancelled
            } else {
                ErrorKind::Panic
            };
            warn!(records = unaccounted, kind = %kind, "Records not processed");
            tracker.record_many(kind, unaccounted);
            failed += unaccounted;
        }

        let processed = outputs.len();
        let result = ProcessingResult::batch(processed, failed, tracker.summary());
        let elapsed = start.elapsed();
        self.metrics
            .record("process_records_parallel", elapsed.as_millis() as u64);

        if result.is_success() {
            info!(
                processed = processed,
                duration_secs = elapsed.as_secs_f64(),
                "Batch complete"
            );
        } else {
            warn!(
                processed = processed,
                failed = failed,
                summary = %result.error_summary,
                duration_secs = elapsed.as_secs_f64(),
                "Batch complete with failures"
            );
        }

        BatchReport {
            result,
            outputs,
            error_counts: tracker.counts(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::ProcessingStatus;
    use growth_common::types::{Gender, StandardType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn record(age: f64) -> GrowthStandardRecord {
        GrowthStandardRecord::new(StandardType::Who, Gender::Female, age, 0.5, 12.2, 0.1)
    }

    fn orchestrator(workers: usize) -> BatchOrchestrator {
        BatchOrchestrator::new(
            workers,
            RetryPolicy::new(3, Duration::from_millis(10)),
            Arc::new(MetricsTracker::default()),
        )
    }

    fn echo_age(record: ValidatedRecord, _attempt: u32) -> impl Future<Output = Outcome<f64>> {
        async move { Outcome::Success(record.age) }
    }

    #[tokio::test]
    async fn test_all_valid_records_succeed() {
        let records: Vec<_> = (0..50).map(|i| record(i as f64)).collect();
        let report = orchestrator(4)
            .process_records_parallel(records, echo_age, CancellationToken::new())
            .await;

        assert_eq!(report.result.status, ProcessingStatus::Success);
        assert_eq!(report.result.processed_records, 50);
        assert_eq!(report.result.failed_records, 0);
        assert_eq!(report.result.error_summary, "");
        let mut ages = report.outputs.clone();
        ages.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(ages, (0..50).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_every_tenth_record_invalid() {
        let records: Vec<_> = (0..100)
            .map(|i| if i % 10 == 0 { record(-1.0) } else { record(i as f64) })
            .collect();
        let report = orchestrator(8)
            .process_records_parallel(records, echo_age, CancellationToken::new())
            .await;

        assert_eq!(report.result.status, ProcessingStatus::PartialFailure);
        assert_eq!(report.result.processed_records, 90);
        assert_eq!(report.result.failed_records, 10);
        assert_eq!(report.result.error_summary, "Validation: 10 occurrences");
        assert_eq!(report.failures(ErrorKind::Validation), 10);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let report = orchestrator(4)
            .process_records_parallel(Vec::new(), echo_age, CancellationToken::new())
            .await;
        assert_eq!(report.result.status, ProcessingStatus::Success);
        assert_eq!(report.result.total_records(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_conservation_independent_of_workers() {
        // Deterministic per-age failure pattern: some recover, some exhaust retries
        let step = |record: ValidatedRecord, attempt: u32| async move {
            match record.age as u32 % 4 {
                0 => Outcome::Success(record.age),
                1 if attempt < 2 => Outcome::Transient(anyhow::anyhow!("flaky")),
                1 => Outcome::Success(record.age),
                2 => Outcome::Transient(anyhow::anyhow!("down")),
                _ => Outcome::Computation("bad".to_string()),
            }
        };

        let records: Vec<_> = (0..40).map(|i| record(i as f64)).collect();
        let single = orchestrator(1)
            .process_records_parallel(records.clone(), step, CancellationToken::new())
            .await;
        let many = orchestrator(6)
            .process_records_parallel(records, step, CancellationToken::new())
            .await;

        for report in [&single, &many] {
            assert_eq!(report.result.processed_records, 20);
            assert_eq!(report.result.failed_records, 20);
            assert_eq!(report.failures(ErrorKind::Transient), 10);
            assert_eq!(report.failures(ErrorKind::Computation), 10);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_conservation_with_random_transient_failures() {
        use rand::prelude::*;

        // Each (record, attempt) pair draws from its own seeded stream, so the
        // failure pattern is random but identical for every worker count
        fn step(seed: u64) -> impl Fn(ValidatedRecord, u32) -> futures::future::Ready<Outcome<f64>> {
            move |record: ValidatedRecord, attempt: u32| {
                let mut rng = StdRng::seed_from_u64(seed ^ ((record.age as u64) << 8) ^ attempt as u64);
                futures::future::ready(if rng.random_bool(0.6) {
                    Outcome::Transient(anyhow::anyhow!("injected"))
                } else {
                    Outcome::Success(record.age)
                })
            }
        }

        let mut rng = StdRng::seed_from_u64(2024);
        let records: Vec<_> = (0..150)
            .map(|i| if rng.random_bool(0.1) { record(-1.0) } else { record(i as f64) })
            .collect();
        let invalid = records.iter().filter(|r| r.age < 0.0).count();

        for seed in [1u64, 7, 42] {
            let mut reports = Vec::new();
            for workers in [1, 3, 8] {
                let report = orchestrator(workers)
                    .process_records_parallel(records.clone(), step(seed), CancellationToken::new())
                    .await;
                assert_eq!(report.result.total_records(), records.len(), "seed={} workers={}", seed, workers);
                assert_eq!(report.outputs.len(), report.result.processed_records);
                assert_eq!(report.failures(ErrorKind::Validation), invalid);
                assert_eq!(
                    report.failures(ErrorKind::Validation) + report.failures(ErrorKind::Transient),
                    report.result.failed_records
                );
                reports.push(report);
            }
            let transient = reports[0].failures(ErrorKind::Transient);
            assert!(transient > 0, "seed={}", seed);
            for report in &reports {
                assert_eq!(report.failures(ErrorKind::Transient), transient);
                assert_eq!(report.result.processed_records, reports[0].result.processed_records);
            }
        }
    }

    #[tokio::test]
    async fn test_panicking_step_is_isolated() {
        let step = |record: ValidatedRecord, _attempt: u32| async move {
            if record.age == 3.0 {
                panic!("boom at age 3");
            }
            Outcome::Success(record.age)
        };

        let records: Vec<_> = (0..10).map(|i| record(i as f64)).collect();
        let report = orchestrator(2)
            .process_records_parallel(records, step, CancellationToken::new())
            .await;

        assert_eq!(report.result.processed_records, 9);
        assert_eq!(report.result.failed_records, 1);
        assert_eq!(report.result.error_summary, "Panic: 1 occurrences");
    }

    #[tokio::test]
    async fn test_summary_in_first_seen_order() {
        let records = vec![record(-1.0), record(5.0), record(-2.0)];
        let report = orchestrator(1)
            .process_records_parallel(
                records,
                |_record: ValidatedRecord, _attempt: u32| async { Outcome::<()>::Computation("nan".into()) },
                CancellationToken::new(),
            )
            .await;

        assert_eq!(
            report.result.error_summary,
            "Validation: 2 occurrences, Computation: 1 occurrences"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_keeps_completed_results() {
        let cancel = CancellationToken::new();
        let completed = Arc::new(AtomicUsize::new(0));

        let trigger = cancel.clone();
        let counter = completed.clone();
        let step = move |record: ValidatedRecord, _attempt: u32| {
            let trigger = trigger.clone();
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) + 1 == 5 {
                    trigger.cancel();
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
                Outcome::Success(record.age)
            }
        };

        let records: Vec<_> = (0..100).map(|i| record(i as f64)).collect();
        let report = orchestrator(1)
            .process_records_parallel(records, step, cancel)
            .await;

        assert_eq!(report.result.total_records(), 100);
        assert_eq!(report.result.processed_records, 5);
        assert_eq!(report.outputs.len(), 5);
        assert_eq!(report.failures(ErrorKind::Cancelled), 95);
        assert_eq!(report.result.status, ProcessingStatus::PartialFailure);
    }

    #[tokio::test]
    async fn test_metrics_recorded() {
        let metrics = Arc::new(MetricsTracker::default());
        let orchestrator = BatchOrchestrator::new(2, RetryPolicy::default(), metrics.clone());
        orchestrator
            .process_records_parallel(vec![record(1.0), record(2.0)], echo_age, CancellationToken::new())
            .await;

        assert_eq!(metrics.get("process_record").unwrap().count, 2);
        assert_eq!(metrics.get("process_records_parallel").unwrap().count, 1);
    }
}
