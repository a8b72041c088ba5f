//! Growth Common Library
//!
//! Shared types, logging bootstrap, and error handling for the growth
//! standard ingestion workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`GrowthError`] and the crate [`Result`] alias
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Types**: growth standard records and the keys percentile tables are stored under
//!
//! # Example
//!
//! ```no_run
//! use growth_common::types::{Gender, GrowthStandardRecord, StandardType};
//!
//! let record = GrowthStandardRecord::new(StandardType::Who, Gender::Male, 24.0, 0.5, 12.2, 0.1);
//! assert_eq!(record.age, 24.0);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{GrowthError, Result};
