//! Typed errors for pipeline operations.

use thiserror::Error;

/// Payload shape violation detected before any ledger write.
/// Carries the path of the offending field (e.g. `source_metadata.collection`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid_payload: {path}: {reason}")]
pub struct ValidationError {
    pub path: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that can occur inside a pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Payload shape violation; fails ingest with a field path, no ledger write.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// DB or embedding endpoint unavailable; retried with backoff.
    #[error("transient I/O error: {0}")]
    TransientIo(#[source] anyhow::Error),

    /// Unique/check constraint hit that shouldn't occur (e.g. double claim).
    /// The offending row is skipped and the run continues.
    #[error("schema invariant violated: {0}")]
    SchemaInvariant(String),

    /// Data that passed v1 validation but fails normalization. Not retried.
    #[error("permanent data error: {0}")]
    PermanentData(String),

    /// Configuration or startup failure. The process exits non-zero.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl PipelineError {
    /// Transient errors are recovered inside the stage; everything else
    /// surfaces via the stage's return value.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientIo(_))
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() || db.is_check_violation() => {
                PipelineError::SchemaInvariant(db.message().to_string())
            }
            _ => PipelineError::TransientIo(err.into()),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
