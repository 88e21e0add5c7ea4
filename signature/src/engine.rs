//! Verification engine: backend classification with a gallery
//! nearest-neighbour fallback.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use autograph_recognition::{Decision, RecognitionError, Recognizer};

use crate::error::SignatureError;
use crate::gallery::GalleryStore;
use crate::profile::TrainingTracker;
use crate::similarity::{Comparator, best_match, clamp_score};
use crate::types::{NewSample, Sample, VerificationResult, VerifyPath};
use crate::validator::{MediaType, ValidationOutcome};

/// Which decision path a verification may take.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// Backend when healthy, gallery otherwise or when the backend call
    /// turns out to be unavailable.
    #[default]
    Auto,
    Backend,
    Gallery,
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyMode::Auto => f.write_str("auto"),
            VerifyMode::Backend => f.write_str("backend"),
            VerifyMode::Gallery => f.write_str("gallery"),
        }
    }
}

impl FromStr for VerifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(VerifyMode::Auto),
            "backend" => Ok(VerifyMode::Backend),
            "gallery" => Ok(VerifyMode::Gallery),
            other => Err(format!("unknown verify mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerifierConfig {
    pub mode: VerifyMode,
}

impl VerifierConfig {
    pub fn with_mode(mut self, mode: VerifyMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Verifier classifies a probe against an identity's enrollment.
pub struct Verifier {
    gallery: Arc<GalleryStore>,
    tracker: Arc<TrainingTracker>,
    recognizer: Arc<dyn Recognizer>,
    comparator: Arc<dyn Comparator>,
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(
        gallery: Arc<GalleryStore>,
        tracker: Arc<TrainingTracker>,
        recognizer: Arc<dyn Recognizer>,
        comparator: Arc<dyn Comparator>,
    ) -> Self {
        Self {
            gallery,
            tracker,
            recognizer,
            comparator,
            config: VerifierConfig::default(),
        }
    }

    pub fn with_config(mut self, config: VerifierConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify `probe` as a signature of `identity_id` using the configured
    /// mode.
    ///
    /// On the backend path the backend's decision is reported as is: a
    /// `match` means the backend recognised *some* enrolled identity, named
    /// in [`VerificationResult::identity_id`], which may differ from
    /// `identity_id`. Callers that need the claim confirmed compare the two.
    pub async fn verify(
        &self,
        identity_id: &str,
        probe: NewSample,
        context_id: Option<&str>,
    ) -> Result<VerificationResult, SignatureError> {
        self.verify_with(identity_id, probe, context_id, self.config.mode)
            .await
    }

    /// Verify with an explicit mode.
    ///
    /// A probe the validator rejects is the only `Err`; every other failure
    /// yields a result with [`Decision::Error`].
    pub async fn verify_with(
        &self,
        identity_id: &str,
        probe: NewSample,
        context_id: Option<&str>,
        mode: VerifyMode,
    ) -> Result<VerificationResult, SignatureError> {
        let media_type = match self.gallery.validator().validate(
            &probe.content,
            &probe.media_type,
            probe.byte_size(),
        ) {
            ValidationOutcome::Accepted(m) => m,
            ValidationOutcome::Rejected(r) => return Err(SignatureError::Validation(r)),
        };

        let result = match mode {
            VerifyMode::Backend => self
                .backend(&probe, media_type, context_id)
                .await
                .unwrap_or_else(|e| VerificationResult::error(VerifyPath::Backend, e.to_string())),
            VerifyMode::Gallery => self.nearest(identity_id, probe).await,
            VerifyMode::Auto => {
                if self.recognizer.health().await.healthy {
                    match self.backend(&probe, media_type, context_id).await {
                        Ok(r) => r,
                        Err(e) if e.is_unavailable() => {
                            warn!(identity_id, error = %e, "verify: backend unavailable, using gallery");
                            self.nearest(identity_id, probe).await
                        }
                        Err(e) => VerificationResult::error(VerifyPath::Backend, e.to_string()),
                    }
                } else {
                    debug!(identity_id, "verify: backend unhealthy, using gallery");
                    self.nearest(identity_id, probe).await
                }
            }
        };

        info!(
            identity_id,
            decision = %result.decision,
            score = result.score,
            path = ?result.path,
            "verify: done"
        );
        Ok(result)
    }

    async fn backend(
        &self,
        probe: &NewSample,
        media_type: MediaType,
        context_id: Option<&str>,
    ) -> Result<VerificationResult, RecognitionError> {
        let v = self
            .recognizer
            .verify(&probe.content, media_type.as_str(), context_id)
            .await?;
        Ok(VerificationResult {
            matched: v.matched,
            identity_id: v.identity_id,
            sample_id: None,
            score: clamp_score(v.score),
            decision: v.decision,
            message: v.message,
            path: VerifyPath::Backend,
        })
    }

    /// Enroll the probe, then score it against every other sample of the
    /// identity.
    async fn nearest(&self, identity_id: &str, probe: NewSample) -> VerificationResult {
        let fail = |message: String| VerificationResult::error(VerifyPath::Gallery, message);

        let enrolled = match self.gallery.enroll(identity_id, probe).await {
            Ok(s) => s,
            Err(e) => return fail(format!("probe enrollment failed: {e}")),
        };
        if let Err(e) = self.tracker.ensure(identity_id) {
            warn!(identity_id, error = %e, "verify: profile not created");
        }

        let candidates: Vec<Sample> = match self.gallery.list(identity_id).await {
            Ok(all) => all.into_iter().filter(|s| s.id != enrolled.id).collect(),
            Err(e) => return fail(format!("gallery unavailable: {e}")),
        };
        if candidates.is_empty() {
            return VerificationResult::insufficient();
        }
        let threshold = match self.tracker.threshold_for(identity_id) {
            Ok(t) => t,
            Err(e) => return fail(format!("threshold unavailable: {e}")),
        };

        let scores = join_all(
            candidates
                .iter()
                .map(|c| self.comparator.compare(&enrolled, c)),
        )
        .await;

        let scored = candidates
            .iter()
            .zip(scores)
            .filter_map(|(candidate, score)| match score {
                Ok(s) => Some((candidate, clamp_score(s))),
                Err(e) => {
                    warn!(identity_id, sample_id = %candidate.id, error = %e, "verify: comparison skipped");
                    None
                }
            });

        let Some((best, score)) = best_match(scored) else {
            return fail(format!("all {} comparisons failed", candidates.len()));
        };

        let matched = score >= threshold;
        VerificationResult {
            matched,
            identity_id: matched.then(|| identity_id.to_string()),
            sample_id: Some(best.id.clone()),
            score,
            decision: if matched {
                Decision::Match
            } else {
                Decision::NoMatch
            },
            message: format!("best score {score:.3} against threshold {threshold:.2}"),
            path: VerifyPath::Gallery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parse_and_display() {
        for mode in [VerifyMode::Auto, VerifyMode::Backend, VerifyMode::Gallery] {
            assert_eq!(mode.to_string().parse::<VerifyMode>().unwrap(), mode);
        }
        assert_eq!("GALLERY".parse::<VerifyMode>().unwrap(), VerifyMode::Gallery);
        assert!("nearest".parse::<VerifyMode>().is_err());
        assert_eq!(VerifyMode::default(), VerifyMode::Auto);
    }

    #[test]
    fn mode_serde_is_snake_case() {
        assert_eq!(serde_json::to_string(&VerifyMode::Backend).unwrap(), "\"backend\"");
        let m: VerifyMode = serde_json::from_str("\"gallery\"").unwrap();
        assert_eq!(m, VerifyMode::Gallery);
    }
}
