//! Record validation
//!
//! A cheap guard run on every record before any retry or persistence work.
//! [`validate`] is pure and allocation-free; [`validation_errors`] produces the
//! human-readable reasons when a caller needs them.

use growth_common::types::GrowthStandardRecord;
use growth_common::{GrowthError, Result};

/// Oldest age covered by the reference tables, in months (20 years)
pub const MAX_AGE_MONTHS: f64 = 240.0;

/// A record that passed [`validate`]. Only this module can construct one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedRecord(GrowthStandardRecord);

impl ValidatedRecord {
    pub fn record(&self) -> &GrowthStandardRecord {
        &self.0
    }

    pub fn into_inner(self) -> GrowthStandardRecord {
        self.0
    }
}

impl std::ops::Deref for ValidatedRecord {
    type Target = GrowthStandardRecord;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Accept a record iff `age ∈ [0, 240]`, `l` and `m` are finite and `s > 0`.
pub fn validate(record: &GrowthStandardRecord) -> Option<ValidatedRecord> {
    // `s > 0.0` is false for NaN, so a NaN coefficient is rejected too
    let valid = record.age >= 0.0
        && record.age <= MAX_AGE_MONTHS
        && record.l.is_finite()
        && record.m.is_finite()
        && record.s > 0.0;

    valid.then_some(ValidatedRecord(*record))
}

/// Every rule the record violates, in a fixed order. Empty for a valid record.
pub fn validation_errors(record: &GrowthStandardRecord) -> Vec<String> {
    let mut errors = Vec::new();

    if record.age.is_nan() || record.age < 0.0 {
        errors.push(format!("Invalid Age: {}. Age must be non-negative.", record.age));
    }
    if record.age > MAX_AGE_MONTHS {
        errors.push(format!(
            "Age {} exceeds maximum of {} months",
            record.age, MAX_AGE_MONTHS
        ));
    }
    if !record.l.is_finite() {
        errors.push(format!("Invalid Lambda (L): {}. Must be finite.", record.l));
    }
    if !record.m.is_finite() {
        errors.push(format!("Invalid Median (M): {}. Must be finite.", record.m));
    }
    if record.s.is_nan() || record.s <= 0.0 {
        errors.push(format!(
            "Invalid Coefficient of Variation (S): {}. Must be positive.",
            record.s
        ));
    }

    errors
}

/// Strict whole-set validation.
///
/// Unlike the per-record path, which folds rejects into the batch result, this
/// fails the entire set and reports every violated rule of every record.
pub fn validate_all<'a, I>(records: I) -> Result<Vec<ValidatedRecord>>
where
    I: IntoIterator<Item = &'a GrowthStandardRecord>,
{
    let mut valid = Vec::new();
    let mut errors = Vec::new();

    for (index, record) in records.into_iter().enumerate() {
        match validate(record) {
            Some(validated) => valid.push(validated),
            None => errors.extend(
                validation_errors(record)
                    .into_iter()
                    .map(|reason| format!("record {}: {}", index, reason)),
            ),
        }
    }

    if errors.is_empty() {
        Ok(valid)
    } else {
        Err(GrowthError::Validation(errors))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use growth_common::types::{Gender, StandardType};
    use proptest::prelude::*;

    fn record(age: f64, l: f64, m: f64, s: f64) -> GrowthStandardRecord {
        GrowthStandardRecord::new(StandardType::Who, Gender::Male, age, l, m, s)
    }

    #[test]
    fn test_accepts_boundaries() {
        assert!(validate(&record(0.0, 0.5, 10.0, 0.1)).is_some());
        assert!(validate(&record(240.0, -1.2, 20.0, 0.08)).is_some());
    }

    #[test]
    fn test_rejects_each_rule() {
        assert!(validate(&record(-1.0, 0.5, 10.0, 0.1)).is_none());
        assert!(validate(&record(240.5, 0.5, 10.0, 0.1)).is_none());
        assert!(validate(&record(12.0, f64::NAN, 10.0, 0.1)).is_none());
        assert!(validate(&record(12.0, 0.5, f64::INFINITY, 0.1)).is_none());
        assert!(validate(&record(12.0, 0.5, 10.0, 0.0)).is_none());
        assert!(validate(&record(12.0, 0.5, 10.0, -0.1)).is_none());
        assert!(validate(&record(12.0, 0.5, 10.0, f64::NAN)).is_none());
    }

    #[test]
    fn test_validation_errors_lists_every_violation() {
        let errors = validation_errors(&record(-1.0, f64::NAN, 0.0, -0.1));
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("Age"));
        assert!(errors[1].contains("Lambda"));
        assert!(errors[2].contains("Coefficient of Variation"));

        assert!(validation_errors(&record(12.0, 0.5, 10.0, 0.1)).is_empty());
    }

    #[test]
    fn test_validate_all_reports_all_records() {
        let records = vec![
            record(-1.0, f64::NAN, 0.0, -0.1),
            record(10.0, 0.5, f64::INFINITY, 0.1),
            record(12.0, 0.5, 10.0, 0.1),
        ];

        match validate_all(&records) {
            Err(GrowthError::Validation(errors)) => {
                assert_eq!(errors.len(), 4);
                assert!(errors.iter().any(|e| e.starts_with("record 1:")));
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        let valid = validate_all(&records[2..]).unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].age, 12.0);
    }

    proptest! {
        #[test]
        fn prop_validate_matches_invariant(
            age in -50.0f64..300.0,
            l in -3.0f64..3.0,
            m in 0.1f64..200.0,
            s in -0.5f64..0.5,
        ) {
            let rec = record(age, l, m, s);
            let expected = (0.0..=240.0).contains(&age) && s > 0.0;
            prop_assert_eq!(validate(&rec).is_some(), expected);
            prop_assert_eq!(validation_errors(&rec).is_empty(), expected);
        }

        #[test]
        fn prop_non_finite_parameters_rejected(age in 0.0f64..=240.0, s in 0.01f64..1.0) {
            prop_assert!(validate(&record(age, f64::NAN, 10.0, s)).is_none());
            prop_assert!(validate(&record(age, 0.5, f64::INFINITY, s)).is_none());
            prop_assert!(validate(&record(age, 0.5, f64::NEG_INFINITY, s)).is_none());
            prop_assert!(validate(&record(age, f64::INFINITY, 10.0, s)).is_none());
            prop_assert!(validate(&record(age, 0.5, f64::NAN, s)).is_none());
        }
    }
}
