//! Outbound persistence of computed percentile rows
//!
//! [`PercentileSink`] is the boundary the orchestrator writes through. Sinks
//! that tolerate concurrent callers implement it directly ([`MemorySink`]);
//! single-writer backends implement [`RecordWriter`] and sit behind a
//! [`WriterStage`], which serialises writes on one blocking thread while the
//! computation workers keep running in parallel.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::lms::PercentileTable;
use crate::validator::ValidatedRecord;
use growth_common::types::MeasurementType;
use growth_common::GrowthError;

/// One persisted row: the source parameters plus their percentile table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileRecord {
    pub standard_id: String,
    pub measurement_type: MeasurementType,
    pub gender: String,
    pub age: f64,
    pub l: f64,
    pub m: f64,
    pub s: f64,
    /// Flat JSON object of rank to value, keys in ascending rank order
    pub percentile_values_json: String,
}

impl PercentileRecord {
    pub fn new(record: &ValidatedRecord, table: &PercentileTable) -> serde_json::Result<Self> {
        Ok(Self {
            standard_id: record.standard_id(),
            measurement_type: table.key.measurement,
            gender: record.gender.as_str().to_string(),
            age: record.age,
            l: record.l,
            m: record.m,
            s: record.s,
            percentile_values_json: table.values.to_json()?,
        })
    }
}

#[async_trait]
pub trait PercentileSink: Send + Sync {
    async fn persist(&self, record: &PercentileRecord) -> Result<()>;

    async fn flush(&self) -> Result<()>;
}

/// In-memory sink; safe to share between workers
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<PercentileRecord>>,
    flushes: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<PercentileRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PercentileSink for MemorySink {
    async fn persist(&self, record: &PercentileRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A backend that must only be driven from one thread at a time
pub trait RecordWriter: Send + 'static {
    fn write(&mut self, record: &PercentileRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Writes one JSON object per line
pub struct JsonLinesWriter<W: Write> {
    inner: BufWriter<W>,
    written: usize,
}

impl JsonLinesWriter<File> {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file {}", path.display()))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: BufWriter::new(writer),
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl<W: Write + Send + 'static> RecordWriter for JsonLinesWriter<W> {
    fn write(&mut self, record: &PercentileRecord) -> Result<()> {
        serde_json::to_writer(&mut self.inner, record).context("Failed to serialize percentile record")?;
        self.inner.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush().context("Failed to flush output")?;
        Ok(())
    }
}

enum Command {
    Write(PercentileRecord, oneshot::Sender<Result<()>>),
    Flush(oneshot::Sender<Result<()>>),
}

/// Serialises access to a [`RecordWriter`] on a dedicated blocking thread.
///
/// Every `persist` waits for the writer's acknowledgement, so a failed write
/// is reported to the caller and can be retried.
pub struct WriterStage {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<usize>,
}

impl WriterStage {
    /// Start the writer thread. `capacity` bounds the pending write queue.
    pub fn spawn<W: RecordWriter>(mut writer: W, capacity: usize) -> Self {
        let (commands, mut receiver) = mpsc::channel::<Command>(capacity.max(1));

        let task = tokio::task::spawn_blocking(move || {
            let mut written = 0usize;
            while let Some(command) = receiver.blocking_recv() {
                match command {
                    Command::Write(record, ack) => {
                        let result = writer.write(&record);
                        if result.is_ok() {
                            written += 1;
                        }
                        let _ = ack.send(result);
                    }
                    Command::Flush(ack) => {
                        let _ = ack.send(writer.flush());
                    }
                }
            }
            if let Err(e) = writer.flush() {
                tracing::error!(error = %e, "Final flush of writer stage failed");
            }
            debug!(written = written, "Writer stage stopped");
            written
        });

        Self { commands, task }
    }

    async fn send(&self, command: impl FnOnce(oneshot::Sender<Result<()>>) -> Command) -> Result<()> {
        let (ack, response) = oneshot::channel();
        self.commands
            .send(command(ack))
            .await
            .map_err(|_| GrowthError::Sink("writer stage is closed".to_string()))?;
        response
            .await
            .map_err(|_| GrowthError::Sink("writer stage stopped before acknowledging".to_string()))?
    }

    /// Close the queue and wait for the writer thread. Returns rows written.
    pub async fn finish(self) -> Result<usize> {
        drop(self.commands);
        let written = self.task.await.context("Writer stage task failed")?;
        info!(written = written, "Writer stage finished");
        Ok(written)
    }
}

#[async_trait]
impl PercentileSink for WriterStage {
    async fn persist(&self, record: &PercentileRecord) -> Result<()> {
        let record = record.clone();
        self.send(|ack| Command::Write(record, ack)).await
    }

    async fn flush(&self) -> Result<()> {
        self.send(Command::Flush).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::lms::LmsCalculator;
    use crate::validator::validate;
    use anyhow::anyhow;
    use growth_common::types::{Gender, GrowthStandardRecord, StandardType};
    use std::io::{BufRead, BufReader};
    use std::sync::Arc;

    fn row(age: f64) -> PercentileRecord {
        let record = GrowthStandardRecord::new(StandardType::Who, Gender::Male, age, 0.5, 12.2, 0.1);
        let validated = validate(&record).unwrap();
        let table =
            PercentileTable::compute(&LmsCalculator::default(), &validated, MeasurementType::Weight).unwrap();
        PercentileRecord::new(&validated, &table).unwrap()
    }

    struct FailingWriter;

    impl RecordWriter for FailingWriter {
        fn write(&mut self, _record: &PercentileRecord) -> Result<()> {
            Err(anyhow!("disk full"))
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_percentile_record_fields() {
        let row = row(24.0);
        assert_eq!(row.standard_id, "who-2006-male");
        assert_eq!(row.gender, "male");
        assert!(row.percentile_values_json.starts_with("{\"3\":"));
        assert!(row.percentile_values_json.contains("\"50\":12.2"));
    }

    #[tokio::test]
    async fn test_memory_sink_concurrent_persist() {
        let sink = Arc::new(MemorySink::new());
        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let sink = sink.clone();
                tokio::spawn(async move { sink.persist(&row(i as f64)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        sink.flush().await.unwrap();

        assert_eq!(sink.len(), 20);
        assert_eq!(sink.flush_count(), 1);
    }

    #[tokio::test]
    async fn test_writer_stage_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/percentiles.jsonl");

        let stage = WriterStage::spawn(JsonLinesWriter::create(&path).unwrap(), 4);
        for age in [0.0, 1.0, 2.0] {
            stage.persist(&row(age)).await.unwrap();
        }
        stage.flush().await.unwrap();
        assert_eq!(stage.finish().await.unwrap(), 3);

        let lines: Vec<String> = BufReader::new(File::open(&path).unwrap())
            .lines()
            .collect::<std::io::Result<_>>()
            .unwrap();
        assert_eq!(lines.len(), 3);
        let parsed: PercentileRecord = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(parsed.age, 1.0);
        assert_eq!(parsed.measurement_type, MeasurementType::Weight);
    }

    #[tokio::test]
    async fn test_writer_stage_surfaces_write_errors() {
        let stage = WriterStage::spawn(FailingWriter, 1);
        let err = stage.persist(&row(3.0)).await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(stage.finish().await.unwrap(), 0);
    }
}
