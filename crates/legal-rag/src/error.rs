//! Typed errors at pipeline stage boundaries.
//!
//! Internal stage logic freely uses `anyhow::Result` for ergonomics; once a
//! failure needs to influence orchestrator control flow (emit a specific SSE
//! `error` kind, decide whether to degrade vs. halt) it is converted into a
//! [`PipelineError`] here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("security violation: {reason}")]
    SecurityViolation { reason: String },

    #[error("invalid request: {reason}")]
    InputError { reason: String },

    #[error("dependency unavailable: {dependency}: {source}")]
    DependencyUnavailable {
        dependency: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("CUTOVER_VIOLATION: query resolved against legacy collections: {collections:?}")]
    CutoverViolation { collections: Vec<String> },

    #[error("stage timed out: {stage}")]
    Timeout { stage: String },

    #[error("internal defect: {0}")]
    InternalDefect(#[from] anyhow::Error),
}

impl PipelineError {
    /// Coarse error-kind tag carried on the SSE `error` event (§7).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SecurityViolation { .. } => "security",
            Self::InputError { .. } => "input",
            Self::DependencyUnavailable { .. } => "dependency_unavailable",
            Self::CutoverViolation { .. } => "cutover_violation",
            Self::Timeout { .. } => "timeout",
            Self::InternalDefect(_) => "internal",
        }
    }

    /// Whether this error kind may terminate the request before any streaming
    /// has begun (§7: "Only SAFETY and CLASSIFY may terminate before
    /// streaming begins").
    pub fn terminates_before_stream(&self) -> bool {
        matches!(self, Self::SecurityViolation { .. } | Self::InputError { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
