use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while operating a single engine instance.
///
/// Variants fall into two classes that callers must keep apart:
///
/// * document-content failures (`Load`, `Transform`, `Export`): the input
///   or requested operation is the problem; retrying on another instance
///   would reproduce the same failure.
/// * instance-health failures (`Start`, `Communication`, `Timeout`): the
///   engine process is the problem; the work itself may succeed elsewhere.
///
/// [`OfficeError::is_content`] encodes the split.
#[derive(Debug, thiserror::Error)]
pub enum OfficeError {
    #[error("engine instance #{ordinal} failed to start: {reason}")]
    Start { ordinal: u32, reason: String },

    #[error("engine rejected document `{path}`: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("transformation `{action}` rejected: {reason}")]
    Transform { action: String, reason: String },

    #[error("export to `{target}` rejected: {reason}")]
    Export { target: PathBuf, reason: String },

    #[error("lost contact with engine instance during {operation}: {reason}")]
    Communication {
        operation: &'static str,
        reason: String,
    },

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },
}

impl OfficeError {
    /// True for failures caused by the document or requested operation
    /// rather than by the health of the engine instance.
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            OfficeError::Load { .. } | OfficeError::Transform { .. } | OfficeError::Export { .. }
        )
    }

    pub(crate) fn comm(operation: &'static str, reason: impl Into<String>) -> Self {
        OfficeError::Communication {
            operation,
            reason: reason.into(),
        }
    }
}
