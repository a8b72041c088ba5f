//! LMS (Lambda-Mu-Sigma) percentile and Z-score calculations
//!
//! Growth references describe the measurement distribution at each age with
//! three parameters: a Box-Cox power `L`, the median `M` and the coefficient of
//! variation `S` (Cole & Green). A percentile `p` maps to a measurement by
//! converting `p` to a standard normal deviate `z` and undoing the Box-Cox
//! transform:
//!
//! ```text
//! X = M · (1 + L·S·z)^(1/L)      |L| ≥ threshold
//! X = exp(ln(M) + S·z)           |L| <  threshold  (limit as L → 0)
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validator::ValidatedRecord;
use growth_common::types::{MeasurementType, PercentileKey};

/// Percentile ranks every stored table carries
pub const STANDARD_PERCENTILES: [u8; 9] = [3, 5, 10, 25, 50, 75, 90, 95, 97];

/// Below this `|L|` the logarithmic limit form is used instead of the power form
pub const DEFAULT_NEAR_ZERO_LAMBDA: f64 = 0.01;

// Abramowitz & Stegun 26.2.23, |error| < 4.5e-4
const NUMERATOR: [f64; 3] = [0.010328, 0.802853, 2.515517];
const DENOMINATOR: [f64; 4] = [0.001308, 0.189269, 1.432788, 1.0];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LmsError {
    /// A probability outside [0, 1]; always a caller bug
    #[error("Probability must be between 0 and 1 (inclusive), got {value}")]
    OutOfRange { value: f64 },

    #[error("Calculated value is invalid ({value}) for p={p}, L={l}, M={m}, S={s}")]
    InvalidComputation {
        value: f64,
        p: f64,
        l: f64,
        m: f64,
        s: f64,
    },

    #[error("Measurement must be positive and finite, got {0}")]
    InvalidMeasurement(f64),
}

/// Evaluate a polynomial with coefficients ordered from the highest power down
fn horner(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().fold(0.0, |acc, c| acc * x + c)
}

/// Inverse of the standard normal CDF (probit).
///
/// `p = 0` and `p = 1` map to negative and positive infinity. `p = 0.5` maps
/// to exactly zero so the 50th percentile reproduces the median.
pub fn inverse_normal_cdf(p: f64) -> Result<f64, LmsError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(LmsError::OutOfRange { value: p });
    }
    if p == 0.0 {
        return Ok(f64::NEG_INFINITY);
    }
    if p == 1.0 {
        return Ok(f64::INFINITY);
    }
    if p == 0.5 {
        return Ok(0.0);
    }

    let lower = p < 0.5;
    let q = if lower { p } else { 1.0 - p };
    let t = (-2.0 * q.ln()).sqrt();
    let x = t - horner(&NUMERATOR, t) / horner(&DENOMINATOR, t);

    Ok(if lower { -x } else { x })
}

/// Percentile and Z-score transforms with a tunable near-zero `L` threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LmsCalculator {
    pub near_zero_lambda: f64,
}

impl Default for LmsCalculator {
    fn default() -> Self {
        Self {
            near_zero_lambda: DEFAULT_NEAR_ZERO_LAMBDA,
        }
    }
}

impl LmsCalculator {
    pub fn new(near_zero_lambda: f64) -> Self {
        Self { near_zero_lambda }
    }

    fn is_near_zero(&self, l: f64) -> bool {
        l.abs() < self.near_zero_lambda
    }

    /// Measurement at probability `p` for the given LMS parameters
    pub fn percentile(&self, p: f64, l: f64, m: f64, s: f64) -> Result<f64, LmsError> {
        let z = inverse_normal_cdf(p)?;

        let value = if self.is_near_zero(l) {
            (m.ln() + z * s).exp()
        } else {
            m * (1.0 + l * s * z).powf(1.0 / l)
        };

        if value.is_nan() || value.is_infinite() || value <= 0.0 {
            return Err(LmsError::InvalidComputation { value, p, l, m, s });
        }

        Ok(value)
    }

    /// Z-score of measurement `x`, the inverse of [`LmsCalculator::percentile`]
    pub fn z_score(&self, x: f64, l: f64, m: f64, s: f64) -> Result<f64, LmsError> {
        if !x.is_finite() || x <= 0.0 {
            return Err(LmsError::InvalidMeasurement(x));
        }

        let z = if self.is_near_zero(l) {
            (x / m).ln() / s
        } else {
            ((x / m).powf(l) - 1.0) / (l * s)
        };

        if z.is_finite() {
            Ok(z)
        } else {
            Err(LmsError::InvalidComputation {
                value: z,
                p: f64::NAN,
                l,
                m,
                s,
            })
        }
    }

    /// Values at every rank in [`STANDARD_PERCENTILES`]
    pub fn table(&self, record: &ValidatedRecord) -> Result<PercentileValues, LmsError> {
        let mut values = BTreeMap::new();
        for rank in STANDARD_PERCENTILES {
            let p = f64::from(rank) / 100.0;
            values.insert(rank, self.percentile(p, record.l, record.m, record.s)?);
        }
        Ok(PercentileValues(values))
    }
}

/// [`LmsCalculator::percentile`] with the default threshold
pub fn calculate_percentile(p: f64, l: f64, m: f64, s: f64) -> Result<f64, LmsError> {
    LmsCalculator::default().percentile(p, l, m, s)
}

/// [`LmsCalculator::z_score`] with the default threshold
pub fn z_score(x: f64, l: f64, m: f64, s: f64) -> Result<f64, LmsError> {
    LmsCalculator::default().z_score(x, l, m, s)
}

/// Rank -> measurement. Serialises as a flat JSON object with keys in rank order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PercentileValues(pub BTreeMap<u8, f64>);

impl PercentileValues {
    pub fn get(&self, rank: u8) -> Option<f64> {
        self.0.get(&rank).copied()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }
}

/// Percentile values for one age of one reference table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileTable {
    pub key: PercentileKey,
    pub values: PercentileValues,
}

impl PercentileTable {
    pub fn compute(
        calculator: &LmsCalculator,
        record: &ValidatedRecord,
        measurement: MeasurementType,
    ) -> Result<Self, LmsError> {
        Ok(Self {
            key: PercentileKey {
                age: record.age,
                measurement,
                gender: record.gender,
                standard: record.standard,
            },
            values: calculator.table(record)?,
        })
    }
}

/// [`PercentileTable::compute`] with the default threshold
pub fn percentile_table(
    record: &ValidatedRecord,
    measurement: MeasurementType,
) -> Result<PercentileTable, LmsError> {
    PercentileTable::compute(&LmsCalculator::default(), record, measurement)
}
