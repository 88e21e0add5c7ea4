//! Session-scoped entry point tying the stores and the engine together.

use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, info_span};

use autograph_kv::KVStore;
use autograph_recognition::{Health, Recognizer};

use crate::blob::BlobStore;
use crate::engine::{Verifier, VerifierConfig, VerifyMode};
use crate::error::SignatureError;
use crate::gallery::{DEFAULT_BUCKET, DEFAULT_PREFIX, GalleryStore};
use crate::profile::{DEFAULT_THRESHOLD, DEFAULT_TRAINING_LEASE, TrainingTracker};
use crate::similarity::{Comparator, ContentComparator};
use crate::types::{NewSample, Sample, Session, TrainingProfile, VerificationResult};
use crate::validator::SampleValidator;

/// SignatureService exposes every operation with the caller's [`Session`]
/// passed explicitly and recorded on the operation's span.
pub struct SignatureService {
    gallery: Arc<GalleryStore>,
    tracker: Arc<TrainingTracker>,
    recognizer: Arc<dyn Recognizer>,
    verifier: Verifier,
}

/// Builder for [`SignatureService`].
pub struct SignatureServiceBuilder {
    kv: Arc<dyn KVStore>,
    blobs: Arc<dyn BlobStore>,
    recognizer: Arc<dyn Recognizer>,
    comparator: Option<Arc<dyn Comparator>>,
    validator: SampleValidator,
    prefix: String,
    bucket: String,
    default_threshold: f32,
    training_lease: Duration,
    mode: VerifyMode,
}

impl SignatureServiceBuilder {
    /// Replace the gallery comparator. Defaults to a [`ContentComparator`]
    /// over the service's blob store.
    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    pub fn validator(mut self, validator: SampleValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn bucket(mut self, bucket: &str) -> Self {
        self.bucket = bucket.to_string();
        self
    }

    pub fn default_threshold(mut self, threshold: f32) -> Self {
        self.default_threshold = threshold;
        self
    }

    /// See [`TrainingTracker::with_training_lease`].
    pub fn training_lease(mut self, lease: Duration) -> Self {
        self.training_lease = lease;
        self
    }

    pub fn mode(mut self, mode: VerifyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn build(self) -> SignatureService {
        let comparator = self
            .comparator
            .unwrap_or_else(|| Arc::new(ContentComparator::new(self.blobs.clone())));
        let gallery = Arc::new(
            GalleryStore::new(self.kv.clone(), self.blobs)
                .with_validator(self.validator)
                .with_prefix(&self.prefix)
                .with_bucket(&self.bucket),
        );
        let tracker = Arc::new(
            TrainingTracker::new(self.kv, self.recognizer.clone())
                .with_prefix(&self.prefix)
                .with_default_threshold(self.default_threshold)
                .with_training_lease(self.training_lease),
        );
        let verifier = Verifier::new(
            gallery.clone(),
            tracker.clone(),
            self.recognizer.clone(),
            comparator,
        )
        .with_config(VerifierConfig::default().with_mode(self.mode));

        SignatureService {
            gallery,
            tracker,
            recognizer: self.recognizer,
            verifier,
        }
    }
}

macro_rules! op_span {
    ($name:literal, $session:ident, $identity:ident) => {
        info_span!(
            $name,
            actor = %$session.actor,
            request_id = %$session.request_id,
            identity_id = %$identity
        )
    };
}

impl SignatureService {
    pub fn builder(
        kv: Arc<dyn KVStore>,
        blobs: Arc<dyn BlobStore>,
        recognizer: Arc<dyn Recognizer>,
    ) -> SignatureServiceBuilder {
        SignatureServiceBuilder {
            kv,
            blobs,
            recognizer,
            comparator: None,
            validator: SampleValidator::default(),
            prefix: DEFAULT_PREFIX.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            default_threshold: DEFAULT_THRESHOLD,
            training_lease: DEFAULT_TRAINING_LEASE,
            mode: VerifyMode::default(),
        }
    }

    pub fn gallery(&self) -> &GalleryStore {
        &self.gallery
    }

    pub fn tracker(&self) -> &TrainingTracker {
        &self.tracker
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    /// Enroll a sample and make sure the identity has a profile.
    pub async fn enroll(
        &self,
        session: &Session,
        identity_id: &str,
        sample: NewSample,
    ) -> Result<Sample, SignatureError> {
        async {
            let stored = self.gallery.enroll(identity_id, sample).await?;
            self.tracker.ensure(identity_id)?;
            Ok(stored)
        }
        .instrument(op_span!("enroll", session, identity_id))
        .await
    }

    pub async fn list(
        &self,
        session: &Session,
        identity_id: &str,
    ) -> Result<Vec<Sample>, SignatureError> {
        self.gallery
            .list(identity_id)
            .instrument(op_span!("list", session, identity_id))
            .await
    }

    pub async fn primary(
        &self,
        session: &Session,
        identity_id: &str,
    ) -> Result<Option<Sample>, SignatureError> {
        self.gallery
            .get_primary(identity_id)
            .instrument(op_span!("primary", session, identity_id))
            .await
    }

    pub async fn set_primary(
        &self,
        session: &Session,
        identity_id: &str,
        sample_id: &str,
    ) -> Result<Sample, SignatureError> {
        self.gallery
            .set_primary(identity_id, sample_id)
            .instrument(op_span!("set_primary", session, identity_id))
            .await
    }

    pub async fn train(
        &self,
        session: &Session,
        identity_id: &str,
    ) -> Result<TrainingProfile, SignatureError> {
        self.tracker
            .train(identity_id)
            .instrument(op_span!("train", session, identity_id))
            .await
    }

    pub fn profile(
        &self,
        session: &Session,
        identity_id: &str,
    ) -> Result<Option<TrainingProfile>, SignatureError> {
        let _span = op_span!("profile", session, identity_id).entered();
        self.tracker.get(identity_id)
    }

    pub fn set_threshold(
        &self,
        session: &Session,
        identity_id: &str,
        threshold: f32,
    ) -> Result<TrainingProfile, SignatureError> {
        let _span = op_span!("set_threshold", session, identity_id).entered();
        self.tracker.set_threshold(identity_id, threshold)
    }

    /// Verify with the configured mode.
    pub async fn verify(
        &self,
        session: &Session,
        identity_id: &str,
        probe: NewSample,
        context_id: Option<&str>,
    ) -> Result<VerificationResult, SignatureError> {
        self.verifier
            .verify(identity_id, probe, context_id)
            .instrument(op_span!("verify", session, identity_id))
            .await
    }

    pub async fn verify_with(
        &self,
        session: &Session,
        identity_id: &str,
        probe: NewSample,
        context_id: Option<&str>,
        mode: VerifyMode,
    ) -> Result<VerificationResult, SignatureError> {
        self.verifier
            .verify_with(identity_id, probe, context_id, mode)
            .instrument(op_span!("verify", session, identity_id))
            .await
    }

    pub async fn health(&self, session: &Session) -> Health {
        self.recognizer
            .health()
            .instrument(info_span!(
                "health",
                actor = %session.actor,
                request_id = %session.request_id
            ))
            .await
    }
}
