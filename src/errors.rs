// src/errors.rs

//! Crate-wide error types and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// An acquisition log arrived for a dataset that is already registered
    /// with different content. Recoverable: halts only that dataset's
    /// ingestion, never the watcher.
    #[error("Duplicate acquisition log for dataset '{0}'")]
    DuplicateDataset(String),

    /// No slot of the required class was granted within the reporting bound.
    /// A scheduling delay, not a dataset failure: the task stays queued.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("State snapshot error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipelineError>;
