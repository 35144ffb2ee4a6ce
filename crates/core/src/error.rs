//! Error types for pkgpulse-core

use thiserror::Error;

/// Result type alias for pkgpulse-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the I/O-free parts of the pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("Failed to parse {what}: {value}")]
    ParseError { what: &'static str, value: String },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}
