//! Ingestion settings loaded from `GROWTH_*` environment variables

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lms::DEFAULT_NEAR_ZERO_LAMBDA;
use crate::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use growth_common::{GrowthError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Worker count for batch processing (default: logical CPUs)
    pub max_parallelism: usize,
    /// Attempts per record, including the first
    pub max_attempts: u32,
    /// First retry delay; doubles on each further retry
    pub backoff_base_secs: u64,
    /// Operations slower than this are logged as warnings
    pub slow_operation_ms: u64,
    /// `|L|` below which the logarithmic LMS form is used
    pub near_zero_lambda: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_parallelism: num_cpus::get().max(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_secs: 2,
            slow_operation_ms: 1000,
            near_zero_lambda: DEFAULT_NEAR_ZERO_LAMBDA,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T> {
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| GrowthError::Config(format!("Invalid {}: '{}'", name, raw))),
        _ => Ok(default),
    }
}

impl IngestConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` to resolve variable names
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            max_parallelism: parse_var(&lookup, "GROWTH_MAX_PARALLELISM", defaults.max_parallelism)?,
            max_attempts: parse_var(&lookup, "GROWTH_MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff_base_secs: parse_var(&lookup, "GROWTH_BACKOFF_BASE_SECS", defaults.backoff_base_secs)?,
            slow_operation_ms: parse_var(&lookup, "GROWTH_SLOW_OPERATION_MS", defaults.slow_operation_ms)?,
            near_zero_lambda: parse_var(&lookup, "GROWTH_NEAR_ZERO_LAMBDA", defaults.near_zero_lambda)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallelism == 0 {
            return Err(GrowthError::Config(
                "GROWTH_MAX_PARALLELISM must be greater than 0".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(GrowthError::Config(
                "GROWTH_MAX_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        if !self.near_zero_lambda.is_finite() || self.near_zero_lambda < 0.0 {
            return Err(GrowthError::Config(format!(
                "GROWTH_NEAR_ZERO_LAMBDA must be a non-negative number, got {}",
                self.near_zero_lambda
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.backoff_base_secs))
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_operation_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<IngestConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IngestConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.max_parallelism, num_cpus::get().max(1));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_policy().delay(1), Duration::from_secs(2));
        assert_eq!(config.slow_threshold(), Duration::from_millis(1000));
        assert_eq!(config.near_zero_lambda, 0.01);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("GROWTH_MAX_PARALLELISM", "2"),
            ("GROWTH_MAX_ATTEMPTS", "5"),
            ("GROWTH_BACKOFF_BASE_SECS", "1"),
            ("GROWTH_NEAR_ZERO_LAMBDA", " 0.001 "),
        ])
        .unwrap();
        assert_eq!(config.max_parallelism, 2);
        assert_eq!(config.retry_policy().max_attempts, 5);
        assert_eq!(config.retry_policy().delay(2), Duration::from_secs(2));
        assert_eq!(config.near_zero_lambda, 0.001);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            load(&[("GROWTH_MAX_ATTEMPTS", "three")]),
            Err(GrowthError::Config(_))
        ));
        assert!(matches!(
            load(&[("GROWTH_MAX_PARALLELISM", "0")]),
            Err(GrowthError::Config(_))
        ));
        assert!(matches!(
            load(&[("GROWTH_NEAR_ZERO_LAMBDA", "-1")]),
            Err(GrowthError::Config(_))
        ));
    }
}
