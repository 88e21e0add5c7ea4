use thiserror::Error;

/// Errors surfaced by a [`crate::Recognizer`].
///
/// Transport failures, timeouts, non-success HTTP statuses and malformed
/// payloads all collapse into [`RecognitionError::Unavailable`]; callers
/// decide between fallback and failure without knowing the transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecognitionError {
    #[error("recognition: {op} unavailable: {reason}")]
    Unavailable { op: &'static str, reason: String },

    #[error("recognition: invalid configuration: {0}")]
    Config(String),
}

impl RecognitionError {
    pub(crate) fn unavailable(op: &'static str, reason: impl Into<String>) -> Self {
        RecognitionError::Unavailable {
            op,
            reason: reason.into(),
        }
    }

    /// Returns true if the backend could not be used for this call.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RecognitionError::Unavailable { .. })
    }
}
