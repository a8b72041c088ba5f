//! Inbound growth reference tables
//!
//! A [`RecordSource`] turns a [`SeedJob`] into raw [`GrowthStandardRecord`]s.
//! Nothing here validates; rejects are counted by the orchestrator.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use growth_common::types::{Gender, GrowthStandardRecord, MeasurementType, StandardType};
use growth_common::GrowthError;

/// One reference table to seed, e.g. weight-for-age
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedJob {
    pub name: String,
    pub measurement: MeasurementType,
    /// File name without extension inside a data directory
    pub file_stem: String,
}

impl SeedJob {
    pub fn new(name: impl Into<String>, measurement: MeasurementType, file_stem: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            measurement,
            file_stem: file_stem.into(),
        }
    }

    pub fn weight_for_age() -> Self {
        Self::new("weight_for_age", MeasurementType::Weight, "weight_for_age")
    }

    pub fn height_for_age() -> Self {
        Self::new("height_for_age", MeasurementType::Height, "height_for_age")
    }

    pub fn bmi_for_age() -> Self {
        Self::new("bmi_for_age", MeasurementType::Bmi, "bmi_for_age")
    }

    /// The three tables seeded by default
    pub fn standard_jobs() -> Vec<Self> {
        vec![Self::weight_for_age(), Self::height_for_age(), Self::bmi_for_age()]
    }

    /// Tables published by `standard`, with the file prefixes of the
    /// per-gender layout. WHO publishes five measurements, CDC three.
    pub fn reference_jobs(standard: StandardType) -> Vec<Self> {
        match standard {
            StandardType::Who => vec![
                Self::new("height_for_age", MeasurementType::Height, "length-height-for-age"),
                Self::new("weight_for_age", MeasurementType::Weight, "weight-for-age"),
                Self::new("bmi_for_age", MeasurementType::Bmi, "bmi-for-age"),
                Self::new(
                    "head_circumference_for_age",
                    MeasurementType::HeadCircumference,
                    "head-circumference",
                ),
                Self::new("weight_for_length", MeasurementType::WeightForLength, "weight-for-length"),
            ],
            StandardType::Cdc => vec![
                Self::new("height_for_age", MeasurementType::Height, "stature-for-age"),
                Self::new("weight_for_age", MeasurementType::Weight, "weight-for-age"),
                Self::new("bmi_for_age", MeasurementType::Bmi, "bmi-for-age"),
            ],
        }
    }
}

/// How table files are arranged inside a data directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableLayout {
    /// `<dir>/<file_stem>.csv`, both genders in one file
    #[default]
    Flat,
    /// `<dir>/<WHO|CDC>/<file_stem>-<M|F>.csv`, one file per gender
    PerGender,
}

impl TableLayout {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableLayout::Flat => "flat",
            TableLayout::PerGender => "per-gender",
        }
    }
}

impl std::fmt::Display for TableLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TableLayout {
    type Err = GrowthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flat" => Ok(TableLayout::Flat),
            "per-gender" | "per_gender" => Ok(TableLayout::PerGender),
            other => Err(GrowthError::Parse(format!("Unknown table layout: {}", other))),
        }
    }
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn load(&self, job: &SeedJob) -> Result<Vec<GrowthStandardRecord>>;
}

const AGE_COLUMNS: [&str; 4] = ["age", "month", "agemos", "age_months"];
const SEX_COLUMNS: [&str; 2] = ["sex", "gender"];

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
}

fn parse_field(row: &csv::StringRecord, index: usize, name: &str, line: u64) -> Result<f64> {
    let raw = row
        .get(index)
        .with_context(|| format!("line {}: missing {} column", line, name))?;
    raw.trim()
        .parse::<f64>()
        .with_context(|| format!("line {}: invalid {} value '{}'", line, name, raw))
}

/// Parse an LMS table.
///
/// Headers are matched case-insensitively: an age column (`Age`, `Month`,
/// `Agemos` or `Age_Months`), `L`, `M`, `S` and an optional `Sex` column
/// using CDC codes or letters. Without a `Sex` column every row takes
/// `gender`; with one, rows are kept only when they match `gender` (if set).
pub fn parse_lms_csv<R: Read>(
    reader: R,
    standard: StandardType,
    gender: Option<Gender>,
) -> Result<Vec<GrowthStandardRecord>> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv.headers().context("Failed to read CSV header")?.clone();
    let age_col = find_column(&headers, &AGE_COLUMNS).context("CSV has no age column")?;
    let l_col = find_column(&headers, &["l"]).context("CSV has no L column")?;
    let m_col = find_column(&headers, &["m"]).context("CSV has no M column")?;
    let s_col = find_column(&headers, &["s"]).context("CSV has no S column")?;
    let sex_col = find_column(&headers, &SEX_COLUMNS);

    if sex_col.is_none() && gender.is_none() {
        bail!("CSV has no Sex column and no gender was configured");
    }

    let mut records = Vec::new();
    for row in csv.records() {
        let row = row.context("Failed to read CSV row")?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);

        let row_gender = match sex_col {
            Some(index) => {
                let raw = row.get(index).unwrap_or_default();
                raw.parse::<Gender>()
                    .with_context(|| format!("line {}: invalid Sex value '{}'", line, raw))?
            }
            None => match gender {
                Some(g) => g,
                None => bail!("line {}: no gender for row", line),
            },
        };
        if gender.is_some_and(|wanted| wanted != row_gender) {
            continue;
        }

        records.push(GrowthStandardRecord::new(
            standard,
            row_gender,
            parse_field(&row, age_col, "age", line)?,
            parse_field(&row, l_col, "L", line)?,
            parse_field(&row, m_col, "M", line)?,
            parse_field(&row, s_col, "S", line)?,
        ));
    }

    Ok(records)
}

/// Reads each job's table files from a directory, see [`TableLayout`]
#[derive(Debug, Clone)]
pub struct CsvDirectorySource {
    dir: PathBuf,
    standard: StandardType,
    gender: Option<Gender>,
    layout: TableLayout,
}

impl CsvDirectorySource {
    pub fn new(dir: impl Into<PathBuf>, standard: StandardType) -> Self {
        Self {
            dir: dir.into(),
            standard,
            gender: None,
            layout: TableLayout::Flat,
        }
    }

    pub fn with_layout(mut self, layout: TableLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn layout(&self) -> TableLayout {
        self.layout
    }

    /// Restrict to one gender, or supply it for files without a `Sex` column
    pub fn with_gender(mut self, gender: Gender) -> Self {
        self.gender = Some(gender);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files to read for `job`, each with the gender its rows belong to.
    ///
    /// Per-gender files carry no `Sex` column, so every row takes the gender
    /// of its file. Without a configured gender both files are read.
    pub fn paths_for(&self, job: &SeedJob) -> Vec<(PathBuf, Option<Gender>)> {
        match self.layout {
            TableLayout::Flat => vec![(self.dir.join(format!("{}.csv", job.file_stem)), self.gender)],
            TableLayout::PerGender => {
                let genders = match self.gender {
                    Some(gender) => vec![gender],
                    None => vec![Gender::Male, Gender::Female],
                };
                let dir = self.dir.join(self.standard.directory());
                genders
                    .into_iter()
                    .map(|gender| {
                        (dir.join(format!("{}-{}.csv", job.file_stem, gender.code())), Some(gender))
                    })
                    .collect()
            }
        }
    }
}

#[async_trait]
impl RecordSource for CsvDirectorySource {
    async fn load(&self, job: &SeedJob) -> Result<Vec<GrowthStandardRecord>> {
        let mut records = Vec::new();
        for (path, gender) in self.paths_for(job) {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;

            let table = parse_lms_csv(bytes.as_slice(), self.standard, gender)
                .with_context(|| format!("Failed to parse {}", path.display()))?;

            info!(
                job = %job.name,
                path = %path.display(),
                records = table.len(),
                "Loaded growth reference table"
            );
            records.extend(table);
        }
        Ok(records)
    }
}

/// Random WHO/CDC records.
///
/// With `include_invalid`, each record has a 4-in-5 chance of exactly one
/// corrupted field: age -1, L NaN, M +inf or S -0.1.
pub fn generate_synthetic_records<R: Rng + ?Sized>(
    count: usize,
    include_invalid: bool,
    rng: &mut R,
) -> Vec<GrowthStandardRecord> {
    (0..count)
        .map(|_| {
            let standard = if rng.random_bool(0.5) {
                StandardType::Who
            } else {
                StandardType::Cdc
            };
            let gender = if rng.random_bool(0.5) {
                Gender::Male
            } else {
                Gender::Female
            };
            let mut record = GrowthStandardRecord::new(
                standard,
                gender,
                rng.random_range(0.0..=240.0),
                rng.random_range(-2.0..2.0),
                rng.random_range(2.0..100.0),
                rng.random_range(0.01..0.2),
            );

            if include_invalid {
                match rng.random_range(0..5) {
                    0 => record.age = -1.0,
                    1 => record.l = f64::NAN,
                    2 => record.m = f64::INFINITY,
                    3 => record.s = -0.1,
                    _ => {}
                }
            }
            record
        })
        .collect()
}

/// Generated records, identical for every job
#[derive(Debug, Clone, Default)]
pub struct SyntheticSource {
    pub count: usize,
    pub include_invalid: bool,
    pub seed: Option<u64>,
}

impl SyntheticSource {
    pub fn new(count: usize, include_invalid: bool) -> Self {
        Self {
            count,
            include_invalid,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[async_trait]
impl RecordSource for SyntheticSource {
    async fn load(&self, job: &SeedJob) -> Result<Vec<GrowthStandardRecord>> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let records = generate_synthetic_records(self.count, self.include_invalid, &mut rng);
        debug!(job = %job.name, records = records.len(), "Generated synthetic records");
        Ok(records)
    }
}
