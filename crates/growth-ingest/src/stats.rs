//! Summary statistics over a reference table

use serde::{Deserialize, Serialize};

use growth_common::types::GrowthStandardRecord;
use growth_common::{GrowthError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthStandardStatistics {
    pub total_records: usize,
    pub average_age: f64,
    pub min_age: f64,
    pub max_age: f64,
    pub average_l: f64,
    pub average_m: f64,
    pub average_s: f64,
}

impl GrowthStandardStatistics {
    /// Single pass over `records`. Empty input is an error.
    pub fn from_records(records: &[GrowthStandardRecord]) -> Result<Self> {
        let first = records.first().ok_or(GrowthError::EmptyInput)?;

        let mut min_age = first.age;
        let mut max_age = first.age;
        let (mut age_sum, mut l_sum, mut m_sum, mut s_sum) = (0.0, 0.0, 0.0, 0.0);

        for record in records {
            min_age = min_age.min(record.age);
            max_age = max_age.max(record.age);
            age_sum += record.age;
            l_sum += record.l;
            m_sum += record.m;
            s_sum += record.s;
        }

        let n = records.len() as f64;
        Ok(Self {
            total_records: records.len(),
            average_age: age_sum / n,
            min_age,
            max_age,
            average_l: l_sum / n,
            average_m: m_sum / n,
            average_s: s_sum / n,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use growth_common::types::{Gender, StandardType};

    #[test]
    fn test_statistics() {
        let records = vec![
            GrowthStandardRecord::new(StandardType::Who, Gender::Male, 0.0, 0.2, 3.0, 0.1),
            GrowthStandardRecord::new(StandardType::Who, Gender::Male, 12.0, 0.4, 9.0, 0.2),
            GrowthStandardRecord::new(StandardType::Who, Gender::Male, 6.0, 0.0, 6.0, 0.3),
        ];
        let stats = GrowthStandardStatistics::from_records(&records).unwrap();

        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.min_age, 0.0);
        assert_eq!(stats.max_age, 12.0);
        assert!((stats.average_age - 6.0).abs() < 1e-12);
        assert!((stats.average_l - 0.2).abs() < 1e-12);
        assert!((stats.average_m - 6.0).abs() < 1e-12);
        assert!((stats.average_s - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input_is_error() {
        assert!(matches!(
            GrowthStandardStatistics::from_records(&[]),
            Err(GrowthError::EmptyInput)
        ));
    }
}
