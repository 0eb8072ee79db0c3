//! Crate-level error type for configuration and setup failures.
//!
//! Per-request failures never surface here — they are carried as
//! [`crate::model::RequestResult`] values with `success: false` so a
//! single bad request never aborts a run (see spec.md §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("invalid benchmark configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown adapter kind: {0}")]
    UnknownAdapter(String),
}

pub type Result<T> = std::result::Result<T, BenchError>;
