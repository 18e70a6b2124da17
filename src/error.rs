//! Error types for the termforge content generation pipeline.

use thiserror::Error;

/// Storage-related errors (sled, serialization, filesystem)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Unavailable(err.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Pipeline errors.
///
/// Per-call provider errors (`Transient`, `RateLimit`, `Timeout`,
/// `EmptyResponse`) are retried by the retry policy. `Auth` is the only
/// provider error that can stop a whole job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Provider rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Provider call timed out after {0} ms")]
    Timeout(u64),

    #[error("Provider authentication failed: {0}")]
    Auth(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider returned too little content ({0} chars)")]
    EmptyResponse(usize),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("A job is already active for column '{0}'")]
    JobConflict(String),

    #[error("No job found for column '{0}'")]
    JobNotFound(String),

    #[error("Invalid job transition: {0}")]
    InvalidTransition(String),
}

impl PipelineError {
    /// Whether a single failed call may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Transient(_)
                | PipelineError::RateLimit(_)
                | PipelineError::Timeout(_)
                | PipelineError::EmptyResponse(_)
        )
    }

    /// Whether the error says the provider is unusable for every unit.
    pub fn is_systemic(&self) -> bool {
        matches!(self, PipelineError::Auth(_))
    }

    /// Short stable label used in logs and grouped error reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Transient(_) => "transient",
            PipelineError::RateLimit(_) => "rate_limit",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Auth(_) => "auth",
            PipelineError::MalformedResponse(_) => "malformed_response",
            PipelineError::EmptyResponse(_) => "empty_response",
            PipelineError::Storage(_) => "storage",
            PipelineError::JobConflict(_) => "job_conflict",
            PipelineError::JobNotFound(_) => "job_not_found",
            PipelineError::InvalidTransition(_) => "invalid_transition",
        }
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Configuration(err.to_string())
    }
}
