// storewarden/src/error.rs
//
// Error taxonomy for the ingest and query boundaries. Enrichment failures
// are deliberately absent from IngestError: the pipeline recovers them
// locally and continues with a null bundle.

use thiserror::Error;

use crate::events::AlertStatus;

/// Failures surfaced to the ingestion caller.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A required field was missing or empty. Nothing was mutated.
    #[error("missing required field: {0}")]
    Validation(&'static str),

    /// Persistence failure. The caller may retry: every aggregation step is
    /// idempotent or monotonic, so reprocessing the same event is repair.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Signal provider lookup failures. All variants degrade to "no server
/// signals available" at the pipeline level.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("signal provider not configured")]
    NotConfigured,

    #[error("signal lookup failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("signal lookup returned HTTP {0}")]
    Status(u16),
}

/// Failures surfaced to the dashboard caller.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("visitor not found")]
    VisitorNotFound,
}

/// Alert status update failures.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert {0} not found")]
    NotFound(String),

    #[error("illegal alert transition {from} -> {to}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },

    #[error("alert audit write failed: {0}")]
    Io(#[from] std::io::Error),
}
