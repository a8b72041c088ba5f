//! Seeding of the standard reference tables
//!
//! The coordinator loads each table from a [`RecordSource`], runs it through
//! the [`BatchOrchestrator`] with a step that computes and persists the
//! percentile row, then flushes the sink. All tables are seeded concurrently.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::lms::{LmsCalculator, PercentileTable};
use crate::orchestrator::BatchOrchestrator;
use crate::retry::Outcome;
use crate::sink::{PercentileRecord, PercentileSink};
use crate::source::{RecordSource, SeedJob};
use crate::types::ProcessingResult;
use crate::validator::ValidatedRecord;
use growth_common::types::MeasurementType;

/// Per-record step: compute the percentile table and persist it.
///
/// Numerical failures are final; sink failures are transient and retried.
pub fn percentile_step(
    calculator: LmsCalculator,
    measurement: MeasurementType,
    sink: Arc<dyn PercentileSink>,
) -> impl Fn(ValidatedRecord, u32) -> BoxFuture<'static, Outcome<PercentileRecord>> + Send + Sync + 'static {
    move |record, _attempt| {
        let sink = sink.clone();
        async move {
            let table = match PercentileTable::compute(&calculator, &record, measurement) {
                Ok(table) => table,
                Err(e) => return Outcome::Computation(e.to_string()),
            };
            let row = match PercentileRecord::new(&record, &table) {
                Ok(row) => row,
                Err(e) => return Outcome::Computation(format!("Failed to encode percentiles: {}", e)),
            };
            match sink.persist(&row).await {
                Ok(()) => Outcome::Success(row),
                Err(e) => Outcome::Transient(e),
            }
        }
        .boxed()
    }
}

/// Outcome of seeding one table
#[derive(Debug, Clone, Serialize)]
pub struct StandardSeedResult {
    pub job: SeedJob,
    pub result: ProcessingResult,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub standards: Vec<StandardSeedResult>,
}

impl SeedSummary {
    pub fn total_processed(&self) -> usize {
        self.standards.iter().map(|s| s.result.processed_records).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.standards.iter().map(|s| s.result.failed_records).sum()
    }

    pub fn get(&self, job_name: &str) -> Option<&StandardSeedResult> {
        self.standards.iter().find(|s| s.job.name == job_name)
    }
}

pub struct IngestionCoordinator {
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn PercentileSink>,
    orchestrator: BatchOrchestrator,
    calculator: LmsCalculator,
    jobs: Vec<SeedJob>,
}

impl IngestionCoordinator {
    pub fn new(
        source: Arc<dyn RecordSource>,
        sink: Arc<dyn PercentileSink>,
        orchestrator: BatchOrchestrator,
    ) -> Self {
        Self {
            source,
            sink,
            orchestrator,
            calculator: LmsCalculator::default(),
            jobs: SeedJob::standard_jobs(),
        }
    }

    pub fn with_calculator(mut self, calculator: LmsCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    /// Replace the default weight/height/BMI jobs
    pub fn with_jobs(mut self, jobs: Vec<SeedJob>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn jobs(&self) -> &[SeedJob] {
        &self.jobs
    }

    /// Seed one table: load, process every record, flush the sink.
    ///
    /// Record-level failures are reported in the result. Only a source or
    /// flush failure is an error.
    #[instrument(skip_all, fields(job = %job.name))]
    pub async fn seed_standard(&self, job: &SeedJob, cancel: CancellationToken) -> Result<ProcessingResult> {
        let metrics = self.orchestrator.metrics().clone();
        let operation = format!("seed_{}", job.name);

        metrics
            .track(&operation, async {
                let records = self
                    .source
                    .load(job)
                    .await
                    .with_context(|| format!("Failed to load records for {}", job.name))?;

                info!("Seeding {} with {} records", job.name, records.len());

                let step = percentile_step(self.calculator, job.measurement, self.sink.clone());
                let report = self
                    .orchestrator
                    .process_records_parallel(records, step, cancel)
                    .await;

                self.sink
                    .flush()
                    .await
                    .with_context(|| format!("Failed to flush sink after {}", job.name))?;

                info!(
                    processed = report.result.processed_records,
                    failed = report.result.failed_records,
                    status = %report.result.status,
                    "Seeded {}",
                    job.name
                );
                Ok::<_, anyhow::Error>(report.result)
            })
            .await
    }

    /// Seed every configured table concurrently.
    ///
    /// Waits for all tables before returning. If any table failed, the first
    /// error (in job order) is returned.
    #[instrument(skip_all)]
    pub async fn seed_all_standards(&self, cancel: CancellationToken) -> Result<SeedSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        info!(run_id = %run_id, tables = self.jobs.len(), "Starting growth standard seeding");

        let outcomes = self
            .orchestrator
            .metrics()
            .track(
                "seed_all_standards",
                join_all(self.jobs.iter().map(|job| {
                    let cancel = cancel.clone();
                    async move {
                        let job_start = Instant::now();
                        let outcome = self.seed_standard(job, cancel).await;
                        (job, outcome, job_start.elapsed().as_secs_f64())
                    }
                })),
            )
            .await;

        let mut standards = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for (job, outcome, duration_secs) in outcomes {
            match outcome {
                Ok(result) => standards.push(StandardSeedResult {
                    job: job.clone(),
                    result,
                    duration_secs,
                }),
                Err(e) => {
                    error!(job = %job.name, error = %format!("{:#}", e), "Seeding failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e.context("Growth standard seeding failed"));
        }

        let summary = SeedSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            standards,
        };
        info!(
            run_id = %run_id,
            processed = summary.total_processed(),
            failed = summary.total_failed(),
            duration_secs = start.elapsed().as_secs_f64(),
            "Growth standard seeding complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::metrics::MetricsTracker;
    use crate::retry::RetryPolicy;
    use crate::sink::MemorySink;
    use crate::validator::validate;
    use async_trait::async_trait;
    use growth_common::types::{Gender, GrowthStandardRecord, StandardType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` persists, then accepts
    struct FlakySink {
        failures: AtomicUsize,
        inner: MemorySink,
    }

    #[async_trait]
    impl PercentileSink for FlakySink {
        async fn persist(&self, record: &PercentileRecord) -> Result<()> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("connection reset");
            }
            self.inner.persist(record).await
        }

        async fn flush(&self) -> Result<()> {
            self.inner.flush().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_retries_sink_failures() {
        let sink = Arc::new(FlakySink {
            failures: AtomicUsize::new(1),
            inner: MemorySink::new(),
        });
        let record = GrowthStandardRecord::new(StandardType::Who, Gender::Male, 24.0, 0.5, 12.2, 0.1);
        let orchestrator =
            BatchOrchestrator::new(1, RetryPolicy::default(), Arc::new(MetricsTracker::default()));

        let step = percentile_step(LmsCalculator::default(), MeasurementType::Weight, sink.clone());
        let report = orchestrator
            .process_records_parallel(vec![record], step, CancellationToken::new())
            .await;

        assert!(report.result.is_success());
        assert_eq!(sink.inner.len(), 1);
        assert_eq!(report.outputs[0].standard_id, "who-2006-male");
    }

    #[tokio::test]
    async fn test_step_reports_computation_failure() {
        let sink = Arc::new(MemorySink::new());
        // 1 + L·S·z goes negative at the 3rd percentile
        let record = GrowthStandardRecord::new(StandardType::Cdc, Gender::Female, 10.0, 5.0, 10.0, 0.5);
        let validated = validate(&record).unwrap();

        let step = percentile_step(LmsCalculator::default(), MeasurementType::Bmi, sink.clone());
        match step(validated, 1).await {
            Outcome::Computation(message) => assert!(message.contains("invalid")),
            other => panic!("expected computation failure, got {:?}", other),
        }
        assert!(sink.is_empty());
    }
}
