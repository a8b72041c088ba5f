//! Growth Standard Ingestion Library
//!
//! Validates WHO and CDC LMS reference tables, derives the standard percentile
//! curves for every age row, and persists them through a pluggable sink.
//!
//! # Components
//!
//! - [`validator`]: structural and range checks on raw records
//! - [`lms`]: probit, LMS percentile and Z-score transforms
//! - [`retry`]: per-record retry with cancellable exponential backoff
//! - [`orchestrator`]: bounded worker pool with exact outcome accounting
//! - [`coordinator`]: concurrent seeding of the weight, height and BMI tables
//! - [`source`] / [`sink`]: inbound tables and outbound percentile rows
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use growth_common::types::StandardType;
//! use growth_ingest::coordinator::IngestionCoordinator;
//! use growth_ingest::metrics::MetricsTracker;
//! use growth_ingest::orchestrator::BatchOrchestrator;
//! use growth_ingest::retry::RetryPolicy;
//! use growth_ingest::sink::MemorySink;
//! use growth_ingest::source::CsvDirectorySource;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = BatchOrchestrator::new(4, RetryPolicy::default(), Arc::new(MetricsTracker::default()));
//!     let coordinator = IngestionCoordinator::new(
//!         Arc::new(CsvDirectorySource::new("./data/cdc", StandardType::Cdc)),
//!         Arc::new(MemorySink::new()),
//!         orchestrator,
//!     );
//!     let summary = coordinator.seed_all_standards(CancellationToken::new()).await?;
//!     println!("{} rows seeded", summary.total_processed());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod coordinator;
pub mod lms;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod sink;
pub mod source;
pub mod stats;
pub mod types;
pub mod validator;

pub use config::IngestConfig;
pub use coordinator::{IngestionCoordinator, SeedSummary};
pub use lms::{calculate_percentile, inverse_normal_cdf, z_score, LmsCalculator, LmsError};
pub use orchestrator::{BatchOrchestrator, BatchReport};
pub use retry::{execute_with_retry, Outcome, RetryPolicy};
pub use types::{ErrorKind, ProcessingResult, ProcessingStatus};
pub use validator::{validate, ValidatedRecord};
