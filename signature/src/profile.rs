//! Per-identity training readiness.
//!
//! Every state change is a compare-and-swap on the identity's profile record,
//! so at most one training request is in flight per identity and a late
//! completion can never overwrite the outcome of a newer request.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use autograph_kv::KVStore;
use autograph_recognition::{Recognizer, TrainingOutcome};

use crate::error::SignatureError;
use crate::gallery::DEFAULT_PREFIX;
use crate::keys::profile_key;
use crate::types::{TrainingProfile, TrainingStatus, is_valid_identity};

/// Threshold used until an identity has a ready profile.
pub const DEFAULT_THRESHOLD: f32 = 0.70;

/// Message recorded when a training request is dropped before it resolves.
pub const CANCELLED: &str = "cancelled";

/// How long a `training` record may go without resolving before it is
/// treated as abandoned by a process that died mid-request.
pub const DEFAULT_TRAINING_LEASE: Duration = Duration::from_secs(600);

const MAX_CAS_ATTEMPTS: usize = 16;

/// TrainingTracker owns the [`TrainingProfile`] of every identity.
pub struct TrainingTracker {
    kv: Arc<dyn KVStore>,
    recognizer: Arc<dyn Recognizer>,
    prefix: String,
    default_threshold: f32,
    lease: Duration,
}

impl TrainingTracker {
    pub fn new(kv: Arc<dyn KVStore>, recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            kv,
            recognizer,
            prefix: DEFAULT_PREFIX.to_string(),
            default_threshold: DEFAULT_THRESHOLD,
            lease: DEFAULT_TRAINING_LEASE,
        }
    }

    /// Age after which an unresolved `training` record no longer blocks a
    /// new request. Should exceed the longest a backend call can take,
    /// retries included.
    pub fn with_training_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn expired(&self, since: DateTime<Utc>) -> bool {
        (Utc::now() - since)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= self.lease)
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Threshold for new profiles and for identities that are not ready.
    /// Values outside `[0, 1]` are ignored.
    pub fn with_default_threshold(mut self, threshold: f32) -> Self {
        if (0.0..=1.0).contains(&threshold) {
            self.default_threshold = threshold;
        }
        self
    }

    pub fn default_threshold(&self) -> f32 {
        self.default_threshold
    }

    fn load(&self, identity_id: &str) -> Result<Option<(Vec<u8>, TrainingProfile)>, SignatureError> {
        match self.kv.get(&profile_key(&self.prefix, identity_id))? {
            Some(raw) => {
                let profile = rmp_serde::from_slice(&raw)?;
                Ok(Some((raw, profile)))
            }
            None => Ok(None),
        }
    }

    /// Replace the stored record with `next` iff it still equals `expected`.
    fn swap(
        &self,
        identity_id: &str,
        expected: Option<&[u8]>,
        next: &TrainingProfile,
    ) -> Result<bool, SignatureError> {
        let encoded = rmp_serde::to_vec_named(next)?;
        Ok(self.kv.compare_and_swap(
            &profile_key(&self.prefix, identity_id),
            expected,
            Some(&encoded),
        )?)
    }

    fn contended(identity_id: &str) -> SignatureError {
        SignatureError::Persistence(format!("profile of {identity_id} is contended"))
    }

    /// Return the profile of `identity_id`, creating an untrained one if
    /// none exists.
    pub fn ensure(&self, identity_id: &str) -> Result<TrainingProfile, SignatureError> {
        if !is_valid_identity(identity_id) {
            return Err(SignatureError::InvalidIdentity(identity_id.to_string()));
        }
        for _ in 0..MAX_CAS_ATTEMPTS {
            if let Some((_, existing)) = self.load(identity_id)? {
                return Ok(existing);
            }
            let fresh = TrainingProfile::new(identity_id, self.default_threshold);
            if self.swap(identity_id, None, &fresh)? {
                debug!(identity_id, "profile: created");
                return Ok(fresh);
            }
        }
        Err(Self::contended(identity_id))
    }

    pub fn get(&self, identity_id: &str) -> Result<Option<TrainingProfile>, SignatureError> {
        if !is_valid_identity(identity_id) {
            return Ok(None);
        }
        Ok(self.load(identity_id)?.map(|(_, p)| p))
    }

    /// Override the acceptance threshold of `identity_id`.
    pub fn set_threshold(
        &self,
        identity_id: &str,
        threshold: f32,
    ) -> Result<TrainingProfile, SignatureError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SignatureError::InvalidThreshold(threshold));
        }
        if !is_valid_identity(identity_id) {
            return Err(SignatureError::InvalidIdentity(identity_id.to_string()));
        }
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.load(identity_id)?;
            let (raw, mut next) = match current {
                Some((raw, p)) => (Some(raw), p),
                None => (None, TrainingProfile::new(identity_id, self.default_threshold)),
            };
            next.threshold = threshold;
            next.updated_at = Utc::now();
            if self.swap(identity_id, raw.as_deref(), &next)? {
                info!(identity_id, threshold, "profile: threshold set");
                return Ok(next);
            }
        }
        Err(Self::contended(identity_id))
    }

    /// The threshold verification should apply: the profile's own once it
    /// is ready, the tracker default otherwise.
    pub fn threshold_for(&self, identity_id: &str) -> Result<f32, SignatureError> {
        Ok(match self.get(identity_id)? {
            Some(p) if p.status == TrainingStatus::Ready => p.threshold,
            _ => self.default_threshold,
        })
    }

    /// Move the profile to `training`, creating it if needed.
    ///
    /// A `training` record older than the lease was left behind by a request
    /// that never resolved; it is first resolved to `error` with message
    /// [`CANCELLED`].
    pub(crate) fn begin(&self, identity_id: &str) -> Result<TrainingProfile, SignatureError> {
        if !is_valid_identity(identity_id) {
            return Err(SignatureError::InvalidIdentity(identity_id.to_string()));
        }
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.load(identity_id)?;
            let (raw, profile) = match current {
                Some((raw, p)) if p.status == TrainingStatus::Training => {
                    if !self.expired(p.updated_at) {
                        return Err(SignatureError::AlreadyInProgress(identity_id.to_string()));
                    }
                    let attempt = p.attempt;
                    let abandoned = p.fail(CANCELLED);
                    if self.swap(identity_id, Some(&raw), &abandoned)? {
                        warn!(identity_id, attempt, "profile: abandoned training resolved");
                    }
                    continue;
                }
                Some((raw, p)) => (Some(raw), p),
                None => (None, TrainingProfile::new(identity_id, self.default_threshold)),
            };
            let next = profile.start_training();
            if self.swap(identity_id, raw.as_deref(), &next)? {
                info!(identity_id, attempt = next.attempt, "profile: training started");
                return Ok(next);
            }
        }
        Err(Self::contended(identity_id))
    }

    /// Resolve training attempt `attempt`.
    ///
    /// A completion whose attempt is no longer the one in flight is stale and
    /// leaves the record untouched; the current profile is returned.
    pub(crate) fn finish(
        &self,
        identity_id: &str,
        attempt: u64,
        result: Result<TrainingOutcome, String>,
    ) -> Result<TrainingProfile, SignatureError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some((raw, current)) = self.load(identity_id)? else {
                return Err(SignatureError::Persistence(format!(
                    "profile of {identity_id} vanished during training"
                )));
            };
            if current.status != TrainingStatus::Training || current.attempt != attempt {
                debug!(identity_id, attempt, current = current.attempt, "profile: stale completion ignored");
                return Ok(current);
            }
            let next = match &result {
                Ok(outcome) => current.complete(outcome.clone()),
                Err(message) => current.fail(message),
            };
            if self.swap(identity_id, Some(&raw), &next)? {
                match next.status {
                    TrainingStatus::Ready => info!(
                        identity_id,
                        samples = next.sample_count,
                        threshold = next.threshold,
                        "profile: ready"
                    ),
                    _ => warn!(
                        identity_id,
                        error = next.error_message.as_deref().unwrap_or_default(),
                        "profile: training failed"
                    ),
                }
                return Ok(next);
            }
        }
        Err(Self::contended(identity_id))
    }

    /// Train the backend model of `identity_id` and record the outcome.
    ///
    /// Backend failures resolve the profile to `error` and are returned as
    /// `Ok`; only a concurrent request for the same identity
    /// ([`SignatureError::AlreadyInProgress`]) or a storage failure is an
    /// `Err`. Dropping the returned future mid-flight resolves the profile to
    /// `error` with message [`CANCELLED`].
    pub async fn train(&self, identity_id: &str) -> Result<TrainingProfile, SignatureError> {
        let started = self.begin(identity_id)?;
        let mut guard = CancelGuard {
            tracker: self,
            identity_id,
            attempt: started.attempt,
            armed: true,
        };

        let result = match self.recognizer.train(identity_id).await {
            Ok(outcome) if outcome.success => Ok(outcome),
            Ok(outcome) => Err(outcome
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or(outcome.message)),
            Err(e) => Err(e.to_string()),
        };
        guard.armed = false;
        self.finish(identity_id, started.attempt, result)
    }
}

struct CancelGuard<'a> {
    tracker: &'a TrainingTracker,
    identity_id: &'a str,
    attempt: u64,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self
            .tracker
            .finish(self.identity_id, self.attempt, Err(CANCELLED.to_string()))
        {
            warn!(identity_id = self.identity_id, error = %e, "profile: failed to record cancellation");
        }
    }
}

#[cfg(test)]
mod tests {
    use autograph_kv::MemoryStore;
    use autograph_recognition::Offline;

    use super::*;

    fn tracker() -> TrainingTracker {
        TrainingTracker::new(Arc::new(MemoryStore::new()), Arc::new(Offline))
    }

    fn outcome(samples: usize, threshold: Option<f32>) -> TrainingOutcome {
        TrainingOutcome {
            success: true,
            message: "ok".into(),
            sample_count: samples,
            centroid: None,
            threshold,
            error: None,
        }
    }

    #[test]
    fn ensure_creates_once() {
        let t = tracker();
        assert_eq!(t.get("42").unwrap(), None);

        let first = t.ensure("42").unwrap();
        assert_eq!(first.status, TrainingStatus::Untrained);
        assert_eq!(first.threshold, DEFAULT_THRESHOLD);
        assert_eq!(first.sample_count, 0);

        let again = t.ensure("42").unwrap();
        assert_eq!(again, first);
    }

    #[test]
    fn threshold_override_is_bounded() {
        let t = tracker();
        assert!(matches!(
            t.set_threshold("42", 1.5),
            Err(SignatureError::InvalidThreshold(_))
        ));
        assert!(matches!(
            t.set_threshold("42", f32::NAN),
            Err(SignatureError::InvalidThreshold(_))
        ));
        assert_eq!(t.set_threshold("42", 0.9).unwrap().threshold, 0.9);
        assert_eq!(t.set_threshold("42", 0.0).unwrap().threshold, 0.0);
    }

    #[test]
    fn threshold_for_uses_default_until_ready() {
        let t = tracker();
        t.set_threshold("42", 0.9).unwrap();
        assert_eq!(t.threshold_for("42").unwrap(), DEFAULT_THRESHOLD);

        let p = t.begin("42").unwrap();
        t.finish("42", p.attempt, Ok(outcome(5, None))).unwrap();
        assert_eq!(t.threshold_for("42").unwrap(), 0.9);
        assert_eq!(t.threshold_for("unknown").unwrap(), DEFAULT_THRESHOLD);
    }

    #[test]
    fn begin_refuses_second_training() {
        let t = tracker();
        let p = t.begin("42").unwrap();
        assert_eq!(p.status, TrainingStatus::Training);
        assert!(matches!(
            t.begin("42"),
            Err(SignatureError::AlreadyInProgress(id)) if id == "42"
        ));
    }

    #[test]
    fn stale_completion_is_ignored() {
        let t = tracker();
        let first = t.begin("42").unwrap();
        t.finish("42", first.attempt, Err("timeout".into())).unwrap();
        let second = t.begin("42").unwrap();

        let stale = t.finish("42", first.attempt, Ok(outcome(9, Some(0.5)))).unwrap();
        assert_eq!(stale.status, TrainingStatus::Training);
        assert_eq!(stale.attempt, second.attempt);

        let done = t.finish("42", second.attempt, Ok(outcome(3, Some(0.8)))).unwrap();
        assert_eq!(done.status, TrainingStatus::Ready);
        assert_eq!(done.sample_count, 3);
        assert_eq!(done.threshold, 0.8);
        assert!(done.last_trained_at.is_some());
        assert_eq!(done.error_message, None);
    }

    #[test]
    fn expired_training_is_taken_over() {
        let kv: Arc<dyn KVStore> = Arc::new(MemoryStore::new());
        let live = TrainingTracker::new(kv.clone(), Arc::new(Offline));
        let first = live.begin("42").unwrap();
        assert!(matches!(
            live.begin("42"),
            Err(SignatureError::AlreadyInProgress(_))
        ));

        let t = TrainingTracker::new(kv, Arc::new(Offline)).with_training_lease(Duration::ZERO);
        let second = t.begin("42").unwrap();
        assert_eq!(second.status, TrainingStatus::Training);
        assert_eq!(second.attempt, first.attempt + 1);

        // The abandoned request can no longer resolve the record.
        let late = t.finish("42", first.attempt, Ok(outcome(4, None))).unwrap();
        assert_eq!(late.attempt, second.attempt);
        assert_eq!(late.status, TrainingStatus::Training);
    }

    #[tokio::test]
    async fn offline_training_resolves_to_error() {
        let t = tracker();
        let p = t.train("42").await.unwrap();
        assert_eq!(p.status, TrainingStatus::Error);
        assert!(!p.error_message.unwrap_or_default().is_empty());

        // A failed profile may be retrained.
        assert_eq!(t.train("42").await.unwrap().attempt, 2);
    }

    #[test]
    fn default_threshold_must_be_in_range() {
        let t = tracker().with_default_threshold(2.0);
        assert_eq!(t.default_threshold(), DEFAULT_THRESHOLD);
        let t = tracker().with_default_threshold(0.6);
        assert_eq!(t.ensure("42").unwrap().threshold, 0.6);
    }
}
