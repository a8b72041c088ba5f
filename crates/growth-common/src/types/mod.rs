//! Common types used across the growth workspace

use serde::{Deserialize, Serialize};

use crate::error::GrowthError;

/// Publisher of a growth reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StandardType {
    /// WHO Child Growth Standards (2006)
    Who,
    /// CDC Growth Charts (2000)
    Cdc,
}

impl StandardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StandardType::Who => "who",
            StandardType::Cdc => "cdc",
        }
    }

    /// Subdirectory holding the per-gender reference files
    pub fn directory(&self) -> &'static str {
        match self {
            StandardType::Who => "WHO",
            StandardType::Cdc => "CDC",
        }
    }

    /// Publication year of the reference tables
    pub fn version(&self) -> &'static str {
        match self {
            StandardType::Who => "2006",
            StandardType::Cdc => "2000",
        }
    }
}

impl std::fmt::Display for StandardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StandardType {
    type Err = GrowthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "who" => Ok(StandardType::Who),
            "cdc" => Ok(StandardType::Cdc),
            other => Err(GrowthError::Parse(format!("Unknown standard type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    /// Single-letter code used in reference file names ("M" / "F")
    pub fn code(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Gender {
    type Err = GrowthError;

    /// Accepts names, letter codes, and the CDC numeric codes (1 = male, 2 = female)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "m" | "male" | "boy" | "boys" | "1" => Ok(Gender::Male),
            "f" | "female" | "girl" | "girls" | "2" => Ok(Gender::Female),
            other => Err(GrowthError::Parse(format!("Unknown gender: {}", other))),
        }
    }
}

/// Which anthropometric measurement a table describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    Weight,
    Height,
    Bmi,
    HeadCircumference,
    WeightForLength,
}

impl MeasurementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementType::Weight => "weight",
            MeasurementType::Height => "height",
            MeasurementType::Bmi => "bmi",
            MeasurementType::HeadCircumference => "head_circumference",
            MeasurementType::WeightForLength => "weight_for_length",
        }
    }
}

impl std::fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One age row of an LMS reference table.
///
/// WHO and CDC rows share the same shape; `standard` records which publisher
/// the row came from. Rows are never mutated after loading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthStandardRecord {
    pub standard: StandardType,
    pub gender: Gender,
    /// Age in months
    pub age: f64,
    /// Box-Cox power
    pub l: f64,
    /// Median
    pub m: f64,
    /// Coefficient of variation
    pub s: f64,
}

impl GrowthStandardRecord {
    pub fn new(standard: StandardType, gender: Gender, age: f64, l: f64, m: f64, s: f64) -> Self {
        Self {
            standard,
            gender,
            age,
            l,
            m,
            s,
        }
    }

    /// Stable identifier of the reference this row belongs to, e.g. `who-2006-male`
    pub fn standard_id(&self) -> String {
        format!(
            "{}-{}-{}",
            self.standard.as_str(),
            self.standard.version(),
            self.gender.as_str()
        )
    }
}

/// Key a percentile table is stored under
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileKey {
    pub age: f64,
    pub measurement: MeasurementType,
    pub gender: Gender,
    pub standard: StandardType,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_gender_from_cdc_codes() {
        assert_eq!("1".parse::<Gender>().unwrap(), Gender::Male);
        assert_eq!("2".parse::<Gender>().unwrap(), Gender::Female);
        assert_eq!(" F ".parse::<Gender>().unwrap(), Gender::Female);
        assert!("3".parse::<Gender>().is_err());
    }

    #[test]
    fn test_standard_id() {
        let record = GrowthStandardRecord::new(StandardType::Cdc, Gender::Female, 36.5, -0.2, 14.1, 0.09);
        assert_eq!(record.standard_id(), "cdc-2000-female");
    }

    #[test]
    fn test_record_serde_lowercase_enums() {
        let record = GrowthStandardRecord::new(StandardType::Who, Gender::Male, 0.0, 0.35, 3.3, 0.146);
        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json["standard"], "who");
        assert_eq!(json["gender"], "male");
    }
}
