//! Growth Ingest - growth standard seeding tool

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use growth_common::logging::{init_logging, LogConfig, LogLevel};
use growth_common::types::{Gender, StandardType};
use growth_ingest::coordinator::{percentile_step, IngestionCoordinator};
use growth_ingest::metrics::MetricsTracker;
use growth_ingest::orchestrator::BatchOrchestrator;
use growth_ingest::sink::{JsonLinesWriter, MemorySink, PercentileSink, WriterStage};
use growth_ingest::source::{
    generate_synthetic_records, parse_lms_csv, CsvDirectorySource, SeedJob, TableLayout,
};
use growth_ingest::stats::GrowthStandardStatistics;
use growth_ingest::{IngestConfig, LmsCalculator};
use rand::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "growth-ingest")]
#[command(author, version, about = "Growth standard ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker count (overrides GROWTH_MAX_PARALLELISM)
    #[arg(long, global = true)]
    parallelism: Option<usize>,

    /// Attempts per record (overrides GROWTH_MAX_ATTEMPTS)
    #[arg(long, global = true)]
    max_attempts: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Seed the reference tables from a CSV directory
    Seed {
        /// Directory holding the table files
        #[arg(short, long)]
        data_dir: PathBuf,

        /// `flat` reads weight_for_age.csv, height_for_age.csv and bmi_for_age.csv;
        /// `per-gender` reads every published table from <WHO|CDC>/<table>-<M|F>.csv
        #[arg(short, long, default_value = "flat")]
        layout: TableLayout,

        /// JSON-lines output file
        #[arg(short, long)]
        output: PathBuf,

        /// Reference publisher of the tables
        #[arg(short, long, default_value = "who")]
        standard: StandardType,

        /// Restrict to one gender (required for files without a Sex column)
        #[arg(short, long)]
        gender: Option<Gender>,
    },

    /// Run one batch over randomly generated records
    Synthetic {
        /// Number of records
        #[arg(short, long, default_value_t = 10_000)]
        count: usize,

        /// Corrupt about 80% of the records
        #[arg(long)]
        invalid: bool,

        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// JSON-lines output file (kept in memory when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print summary statistics for one table
    Stats {
        #[arg(short, long)]
        data_dir: PathBuf,

        /// File name without the .csv extension
        #[arg(short, long)]
        file_stem: String,

        #[arg(short, long, default_value = "who")]
        standard: StandardType,

        #[arg(short, long)]
        gender: Option<Gender>,
    },
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            token.cancel();
        }
    });
}

type OpenedSink = (Arc<dyn PercentileSink>, Option<Arc<WriterStage>>);

/// A JSON-lines writer stage, or an in-memory sink when no path is given
fn open_sink(output: Option<&Path>, capacity: usize) -> Result<OpenedSink> {
    match output {
        Some(path) => {
            let stage = Arc::new(WriterStage::spawn(JsonLinesWriter::create(path)?, capacity));
            let sink: Arc<dyn PercentileSink> = stage.clone();
            Ok((sink, Some(stage)))
        }
        None => {
            let sink: Arc<dyn PercentileSink> = Arc::new(MemorySink::new());
            Ok((sink, None))
        }
    }
}

async fn close_stage(stage: Option<Arc<WriterStage>>) -> Result<()> {
    if let Some(stage) = stage {
        match Arc::try_unwrap(stage) {
            Ok(stage) => {
                stage.finish().await?;
            }
            Err(stage) => stage.flush().await?,
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("growth-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env().context("Invalid GROWTH_* configuration")?;
    if let Some(parallelism) = cli.parallelism {
        config.max_parallelism = parallelism;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.max_attempts = max_attempts;
    }
    config.validate()?;
    debug!(?config, "Loaded ingest configuration");

    let metrics = Arc::new(MetricsTracker::new(config.slow_threshold()));
    let orchestrator = BatchOrchestrator::new(config.max_parallelism, config.retry_policy(), metrics.clone());
    let calculator = LmsCalculator::new(config.near_zero_lambda);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    match cli.command {
        Command::Seed {
            data_dir,
            layout,
            output,
            standard,
            gender,
        } => {
            info!("Seeding {} tables from {} ({} layout)", standard, data_dir.display(), layout);

            let mut source = CsvDirectorySource::new(data_dir, standard).with_layout(layout);
            if let Some(gender) = gender {
                source = source.with_gender(gender);
            }
            let (sink, stage) = open_sink(Some(output.as_path()), config.max_parallelism)?;

            let jobs = match layout {
                TableLayout::Flat => SeedJob::standard_jobs(),
                TableLayout::PerGender => SeedJob::reference_jobs(standard),
            };
            let coordinator = IngestionCoordinator::new(Arc::new(source), sink, orchestrator)
                .with_calculator(calculator)
                .with_jobs(jobs);
            let summary = coordinator.seed_all_standards(cancel).await;
            drop(coordinator);
            close_stage(stage).await?;

            let summary = summary?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        },
        Command::Synthetic {
            count,
            invalid,
            seed,
            output,
        } => {
            info!("Processing {} synthetic records", count);

            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            let records = generate_synthetic_records(count, invalid, &mut rng);
            let (sink, stage) = open_sink(output.as_deref(), config.max_parallelism)?;

            let job = SeedJob::weight_for_age();
            let step = percentile_step(calculator, job.measurement, sink.clone());
            let report = orchestrator.process_records_parallel(records, step, cancel).await;
            sink.flush().await?;
            drop(sink);
            close_stage(stage).await?;

            println!("{}", serde_json::to_string_pretty(&report.result)?);
        },
        Command::Stats {
            data_dir,
            file_stem,
            standard,
            gender,
        } => {
            let path = data_dir.join(format!("{}.csv", file_stem));
            let file = std::fs::File::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let records = parse_lms_csv(file, standard, gender)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            let stats = GrowthStandardStatistics::from_records(&records)?;

            println!("{}", serde_json::to_string_pretty(&stats)?);
        },
    }

    debug!(metrics = %serde_json::to_string(&metrics.snapshot())?, "Operation metrics");
    info!("Ingestion complete");
    Ok(())
}
