use std::time::Duration;

use office_engine::OfficeError;
use office_filter::FilterError;

/// Caller-facing conversion failure.
///
/// Instance-health failures are recovered internally (restart + requeue)
/// up to the retry limit and only surface as [`ConvertError::Exhausted`];
/// document-content failures surface immediately via
/// [`ConvertError::Office`] / [`ConvertError::Filter`] because retrying
/// them would reproduce the same failure.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// No engine instance could be brought up at all.
    #[error("engine pool failed to start: {reason}")]
    Start { reason: String },

    /// The task queue was full at submission; nothing was enqueued.
    #[error("conversion queue is full (capacity {capacity})")]
    Backpressure { capacity: usize },

    /// No instance became available; the pool has nothing left to offer.
    #[error("no engine instance available after {waited:?}")]
    PoolExhausted { waited: Duration },

    /// The task was cancelled before completing.
    #[error("conversion cancelled")]
    Cancelled,

    /// The converter shut down before the task ran.
    #[error("converter terminated")]
    Terminated,

    /// Instance-health failures used up every allowed retry.
    #[error("conversion failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: OfficeError,
    },

    /// The loaded document has no export path to the requested format.
    #[error("cannot export a {family} document to `.{extension}`")]
    UnsupportedConversion { family: String, extension: String },

    /// Engine-reported failure, surfaced as-is (content failures).
    #[error(transparent)]
    Office(#[from] OfficeError),

    /// A filter rejected the document.
    #[error(transparent)]
    Filter(#[from] FilterError),
}
