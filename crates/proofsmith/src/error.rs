//! Pipeline error taxonomy with fallback classification.
//!
//! Every failure a stage call can produce is represented here. The fallback
//! executor queries `triggers_fallback()` instead of string-matching, with one
//! exception carried over from the upstream provider: gateway error bodies
//! that mention `Invalid schema for response_format` are a schema-contract
//! violation dressed up as an HTTP error, so the provider maps them to
//! [`PipelineError::SchemaValidation`] before they reach the executor.
//!
//! ## Fallback policy
//!
//! | Error              | Falls back | Rationale                               |
//! |--------------------|------------|-----------------------------------------|
//! | SchemaValidation   | no         | a different model won't fix the contract |
//! | Provider           | yes        | transport errors are model-specific      |
//! | Timeout            | yes        | a faster fallback may still answer       |
//! | EmptyDraft         | yes        | treated as a per-model failure           |
//! | BothModelsFailed   | n/a        | terminal, produced by the executor       |

use thiserror::Error;

/// Unified error type for provider calls and the variant pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The model responded but its output violates the expected structure.
    /// Never triggers model fallback; the planner gets one repair retry.
    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    /// Network or upstream gateway failure.
    #[error("Model provider error: {0}")]
    Provider(String),

    /// Deadline exceeded; the in-flight call was cancelled.
    #[error("Model call timed out after {0}ms.")]
    Timeout(u64),

    /// The writer produced blank text. Fatal for the attempt; the outer
    /// attempt loop is the retry mechanism.
    #[error("Writer returned an empty draft.")]
    EmptyDraft,

    /// Both the primary and fallback models failed. Always fatal.
    #[error("Primary and fallback models failed. Primary: {primary}. Fallback: {fallback}.")]
    BothModelsFailed { primary: String, fallback: String },

    /// An illegal state transition inside the orchestrator. Internal bug.
    #[error("Illegal pipeline transition: {0}")]
    IllegalTransition(String),

    /// A background job carried a payload the worker cannot interpret.
    #[error("Invalid background job payload.")]
    InvalidJobPayload,

    /// Any other internal failure.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether the fallback executor may retry this failure on the
    /// fallback model.
    pub fn triggers_fallback(&self) -> bool {
        match self {
            Self::SchemaValidation(_) => false,
            Self::Provider(_) | Self::Timeout(_) | Self::EmptyDraft => true,
            // Terminal or internal shapes never reach the executor's retry
            // decision, but classify them conservatively.
            Self::BothModelsFailed { .. }
            | Self::IllegalTransition(_)
            | Self::InvalidJobPayload
            | Self::Internal(_) => false,
        }
    }
}

/// Failures raised by proof/job persistence.
///
/// Store errors never fail a user-facing generation result; the service
/// surfaces them as warning events and keeps going.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("Stored proof data is invalid.")]
    CorruptRecord,
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::Database(err.to_string())
    }
}
