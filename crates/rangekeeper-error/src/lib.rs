//! Error taxonomy shared across the storage engine's crates.
//!
//! Each crate that needs its own fallible surface still gets its own
//! `Result` alias; what lives here are the variants that cross crate
//! boundaries (provider transport failures feeding into the engine's
//! `FAILED` transition, persistence failures feeding into both the engine
//! and the dataset manager).

use std::io;

/// Failure talking to the upstream range service.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error requesting range for prefix {prefix}: {message}")]
    Transport { prefix: String, message: String },

    /// Non-2xx response after the body was read. Carries the status code so
    /// callers can tell apart 5xx (retried) from 4xx (not retried further).
    #[error("upstream returned status {status} for prefix {prefix}")]
    Status { prefix: String, status: u16 },

    #[error("retries exhausted requesting range for prefix {prefix}: {last_error}")]
    RetriesExhausted { prefix: String, last_error: String },
}

impl ProviderError {
    /// Only response-class errors are eligible for the retry schedule;
    /// malformed input is rejected before a request is ever made.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::RetriesExhausted { .. } => false,
        }
    }
}

/// Failure reading or writing the engine's persisted state files.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed json in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The crate-wide error surfaced by the storage engine's public operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid prefix {prefix:?}: {reason}")]
    InvalidPrefix { prefix: String, reason: &'static str },

    #[error("upstream request failed: {0}")]
    UpstreamFatal(#[from] ProviderError),

    #[error("failed to persist engine state: {0}")]
    Persistence(#[from] DatasetError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
