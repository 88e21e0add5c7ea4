use crate::error::RecognitionError;
use crate::types::{BackendVerification, Health, TrainingOutcome};

/// Recognizer is the boundary to the external signature recognition backend.
///
/// Implementations must be safe for concurrent use (Send + Sync) and must
/// bound every call in time. Failures are reported as
/// [`RecognitionError::Unavailable`] regardless of the transport.
#[async_trait::async_trait]
pub trait Recognizer: Send + Sync {
    /// Ask the backend to (re)train the model for one identity.
    async fn train(&self, identity_id: &str) -> Result<TrainingOutcome, RecognitionError>;

    /// Classify a probe image. `context_id` scopes the candidate set on the
    /// backend (e.g. an attendance session).
    async fn verify(
        &self,
        probe: &[u8],
        media_type: &str,
        context_id: Option<&str>,
    ) -> Result<BackendVerification, RecognitionError>;

    /// Report backend liveness. Never fails; an unreachable backend is
    /// simply unhealthy.
    async fn health(&self) -> Health;
}

/// A recognizer for deployments without a backend.
///
/// Always unhealthy, so verification runs on the enrolled gallery alone and
/// training requests resolve to an error profile.
#[derive(Debug, Default, Clone, Copy)]
pub struct Offline;

#[async_trait::async_trait]
impl Recognizer for Offline {
    async fn train(&self, _identity_id: &str) -> Result<TrainingOutcome, RecognitionError> {
        Err(RecognitionError::unavailable("train", "no backend configured"))
    }

    async fn verify(
        &self,
        _probe: &[u8],
        _media_type: &str,
        _context_id: Option<&str>,
    ) -> Result<BackendVerification, RecognitionError> {
        Err(RecognitionError::unavailable("verify", "no backend configured"))
    }

    async fn health(&self) -> Health {
        Health { healthy: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offline_is_never_available() {
        let r = Offline;
        assert!(!r.health().await.healthy);
        assert!(r.train("42").await.unwrap_err().is_unavailable());
        assert!(
            r.verify(b"x", "image/png", None)
                .await
                .unwrap_err()
                .is_unavailable()
        );
    }
}
