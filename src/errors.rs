//! Error types for configuration, table I/O, identity storage, and runs.

use std::path::PathBuf;

use thiserror::Error;

/// Operator input rejected before a run starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("delay between searches must be a number of seconds >= 0, got {0}")]
    InvalidDelay(f64),
    #[error("cooldown budget must be a positive number of searches")]
    InvalidCooldownBudget,
    #[error("cooldown window {min}..={max} seconds is empty or longer than a day")]
    InvalidCooldownWindow { min: u64, max: u64 },
    #[error("no input file selected")]
    MissingInputFile,
    #[error("input file does not exist: {0}")]
    InputFileNotFound(PathBuf),
}

/// Failures reading or writing the track table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("required column '{0}' is missing")]
    MissingColumn(&'static str),
    #[error("line {line} has {found} fields, expected at most {expected}")]
    RowTooLong {
        line: u64,
        expected: usize,
        found: usize,
    },
}

/// Failures loading or saving the operator's attributed username.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid identity file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("a username is required to continue")]
    Missing,
}

/// Errors surfaced while assembling or starting a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cache backend error: {0}")]
    Cache(String),
    #[error("a run is already active")]
    AlreadyRunning,
    #[error("could not spawn worker thread: {0}")]
    Worker(String),
}
