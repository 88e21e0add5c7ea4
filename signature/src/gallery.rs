//! Per-identity signature galleries.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use autograph_kv::KVStore;

use crate::blob::BlobStore;
use crate::error::SignatureError;
use crate::keys::{
    blob_path, gallery_prefix, parse_sid_value, primary_key, sample_key, sid_key, sid_value,
};
use crate::types::{NewSample, Sample, is_valid_identity, next_seq};
use crate::validator::{SampleValidator, ValidationOutcome};

/// Default KV key prefix.
pub const DEFAULT_PREFIX: &str = "ag";

/// Default top-level blob directory.
pub const DEFAULT_BUCKET: &str = "signatures";

const MAX_CAS_ATTEMPTS: usize = 16;

/// GalleryStore persists enrolled samples: metadata in a [`KVStore`], binary
/// content in a [`BlobStore`].
///
/// An enrollment is all-or-nothing. The binary is written first and the
/// metadata record plus reverse index in one batch; if the batch fails (or
/// the enrollment future is dropped in between) the binary is removed.
pub struct GalleryStore {
    kv: Arc<dyn KVStore>,
    blobs: Arc<dyn BlobStore>,
    validator: SampleValidator,
    prefix: String,
    bucket: String,
}

impl GalleryStore {
    pub fn new(kv: Arc<dyn KVStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            kv,
            blobs,
            validator: SampleValidator::default(),
            prefix: DEFAULT_PREFIX.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
        }
    }

    pub fn with_validator(mut self, validator: SampleValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.bucket = bucket.to_string();
        self
    }

    pub fn validator(&self) -> &SampleValidator {
        &self.validator
    }

    /// Validate and store a new sample for `identity_id`.
    pub async fn enroll(
        &self,
        identity_id: &str,
        sample: NewSample,
    ) -> Result<Sample, SignatureError> {
        if !is_valid_identity(identity_id) {
            return Err(SignatureError::InvalidIdentity(identity_id.to_string()));
        }

        let byte_size = sample.byte_size();
        let media_type =
            match self
                .validator
                .validate(&sample.content, &sample.media_type, byte_size)
            {
                ValidationOutcome::Accepted(m) => m,
                ValidationOutcome::Rejected(r) => {
                    debug!(identity_id, reason = %r, "gallery: sample rejected");
                    return Err(SignatureError::Validation(r));
                }
            };

        let record = Sample {
            id: Uuid::new_v4().to_string(),
            identity_id: identity_id.to_string(),
            path: blob_path(
                &self.bucket,
                identity_id,
                &Uuid::new_v4().simple().to_string(),
                media_type.extension(),
            ),
            media_type,
            byte_size,
            capture: sample.capture,
            created_at: Utc::now(),
            seq: next_seq(),
            quality: sample.quality,
            features: sample.features,
        };
        let encoded = rmp_serde::to_vec_named(&record)?;

        let mut guard = BlobGuard::new(self.blobs.clone(), record.path.clone());
        if let Err(e) = self.blobs.put(&record.path, &sample.content).await {
            warn!(identity_id, path = %record.path, error = %e, "gallery: binary write failed");
            guard.discard().await;
            return Err(e);
        }

        let skey = sample_key(&self.prefix, identity_id, record.seq, &record.id);
        let ikey = sid_key(&self.prefix, &record.id);
        let ival = sid_value(identity_id, record.seq);
        if let Err(e) = self
            .kv
            .batch_set(&[(&skey, &encoded), (&ikey, ival.as_bytes())])
        {
            warn!(identity_id, path = %record.path, error = %e, "gallery: metadata write failed, removing binary");
            guard.discard().await;
            return Err(e.into());
        }
        guard.commit();

        info!(
            identity_id,
            sample_id = %record.id,
            bytes = record.byte_size,
            media_type = %record.media_type,
            "gallery: enrolled"
        );
        Ok(record)
    }

    /// All samples of `identity_id`, newest first. Unknown identities have an
    /// empty gallery.
    pub async fn list(&self, identity_id: &str) -> Result<Vec<Sample>, SignatureError> {
        if !is_valid_identity(identity_id) {
            return Ok(Vec::new());
        }
        let rows = self.kv.scan(&gallery_prefix(&self.prefix, identity_id))?;
        let mut samples = rows
            .iter()
            .map(|(_, value)| rmp_serde::from_slice::<Sample>(value))
            .collect::<Result<Vec<_>, _>>()?;
        samples.reverse();
        Ok(samples)
    }

    pub async fn count(&self, identity_id: &str) -> Result<usize, SignatureError> {
        if !is_valid_identity(identity_id) {
            return Ok(0);
        }
        Ok(self
            .kv
            .scan(&gallery_prefix(&self.prefix, identity_id))?
            .len())
    }

    /// Look up a sample by id across all galleries.
    pub async fn get(&self, sample_id: &str) -> Result<Option<Sample>, SignatureError> {
        let Some(raw) = self.kv.get(&sid_key(&self.prefix, sample_id))? else {
            return Ok(None);
        };
        let (identity, seq) = parse_sid_value(&raw).map_err(SignatureError::Serialization)?;
        match self
            .kv
            .get(&sample_key(&self.prefix, &identity, seq, sample_id))?
        {
            Some(value) => Ok(Some(rmp_serde::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Read a sample's binary content.
    pub async fn content(&self, sample: &Sample) -> Result<Vec<u8>, SignatureError> {
        self.blobs.get(&sample.path).await
    }

    /// The explicitly designated primary if it is still a member, else the
    /// newest sample, else `None`.
    pub async fn get_primary(&self, identity_id: &str) -> Result<Option<Sample>, SignatureError> {
        if !is_valid_identity(identity_id) {
            return Ok(None);
        }
        if let Some(raw) = self.kv.get(&primary_key(&self.prefix, identity_id))? {
            let sample_id = String::from_utf8_lossy(&raw);
            match self.get(&sample_id).await? {
                Some(s) if s.identity_id == identity_id => return Ok(Some(s)),
                _ => debug!(identity_id, %sample_id, "gallery: stale primary designation"),
            }
        }
        Ok(self.list(identity_id).await?.into_iter().next())
    }

    /// Designate `sample_id` as the primary sample of `identity_id`.
    ///
    /// Idempotent; fails with [`SignatureError::NotMember`] when the sample
    /// belongs to another identity or does not exist.
    pub async fn set_primary(
        &self,
        identity_id: &str,
        sample_id: &str,
    ) -> Result<Sample, SignatureError> {
        if !is_valid_identity(identity_id) {
            return Err(SignatureError::InvalidIdentity(identity_id.to_string()));
        }
        let sample = self
            .get(sample_id)
            .await?
            .filter(|s| s.identity_id == identity_id)
            .ok_or_else(|| SignatureError::NotMember {
                identity_id: identity_id.to_string(),
                sample_id: sample_id.to_string(),
            })?;

        let key = primary_key(&self.prefix, identity_id);
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.kv.get(&key)?;
            if current.as_deref() == Some(sample_id.as_bytes()) {
                return Ok(sample);
            }
            if self
                .kv
                .compare_and_swap(&key, current.as_deref(), Some(sample_id.as_bytes()))?
            {
                info!(identity_id, sample_id, "gallery: primary set");
                return Ok(sample);
            }
            debug!(identity_id, "gallery: primary changed concurrently, retrying");
        }
        Err(SignatureError::Persistence(format!(
            "primary designation for {identity_id} is contended"
        )))
    }
}

/// Removes a written binary unless the enrollment commits.
///
/// On drop (the enrollment future was cancelled between the binary write and
/// the metadata commit) removal is handed to the current tokio runtime.
struct BlobGuard {
    blobs: Arc<dyn BlobStore>,
    path: Option<String>,
}

impl BlobGuard {
    fn new(blobs: Arc<dyn BlobStore>, path: String) -> Self {
        Self {
            blobs,
            path: Some(path),
        }
    }

    fn commit(&mut self) {
        self.path = None;
    }

    async fn discard(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = self.blobs.delete(&path).await {
                warn!(%path, error = %e, "gallery: failed to remove orphan binary");
            }
        }
    }
}

impl Drop for BlobGuard {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let blobs = self.blobs.clone();
                handle.spawn(async move {
                    if let Err(e) = blobs.delete(&path).await {
                        warn!(%path, error = %e, "gallery: failed to remove orphan binary");
                    }
                });
            }
            Err(_) => warn!(%path, "gallery: enrollment cancelled outside a runtime, binary left behind"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use autograph_kv::{KVError, KVResult, MemoryStore};

    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::validator::Rejection;
    use crate::validator::fixtures::{jpeg, png};

    fn gallery() -> (GalleryStore, MemoryBlobStore) {
        let blobs = MemoryBlobStore::new();
        let store = GalleryStore::new(Arc::new(MemoryStore::new()), Arc::new(blobs.clone()));
        (store, blobs)
    }

    /// Delegates to a memory store but refuses batch writes.
    struct ReadOnlyKv(MemoryStore);

    impl KVStore for ReadOnlyKv {
        fn get(&self, key: &str) -> KVResult<Option<Vec<u8>>> {
            self.0.get(key)
        }
        fn set(&self, _key: &str, _value: &[u8]) -> KVResult<()> {
            Err(KVError::Storage("read-only".into()))
        }
        fn delete(&self, key: &str) -> KVResult<()> {
            self.0.delete(key)
        }
        fn scan(&self, prefix: &str) -> KVResult<Vec<(String, Vec<u8>)>> {
            self.0.scan(prefix)
        }
        fn batch_set(&self, _entries: &[(&str, &[u8])]) -> KVResult<()> {
            Err(KVError::Storage("read-only".into()))
        }
        fn compare_and_swap(
            &self,
            _key: &str,
            _expected: Option<&[u8]>,
            _new: Option<&[u8]>,
        ) -> KVResult<bool> {
            Err(KVError::Storage("read-only".into()))
        }
    }

    /// Stores the binary, then never returns from `put`.
    struct StallingBlobs(MemoryBlobStore);

    #[async_trait::async_trait]
    impl BlobStore for StallingBlobs {
        async fn put(&self, path: &str, content: &[u8]) -> Result<(), SignatureError> {
            self.0.put(path, content).await?;
            std::future::pending::<()>().await;
            Ok(())
        }
        async fn get(&self, path: &str) -> Result<Vec<u8>, SignatureError> {
            self.0.get(path).await
        }
        async fn delete(&self, path: &str) -> Result<(), SignatureError> {
            self.0.delete(path).await
        }
        async fn exists(&self, path: &str) -> Result<bool, SignatureError> {
            self.0.exists(path).await
        }
    }

    #[tokio::test]
    async fn enroll_then_list_contains_sample() {
        let (g, blobs) = gallery();
        let s = g.enroll("42", NewSample::new(png(64), "image/png")).await.unwrap();

        assert_eq!(s.identity_id, "42");
        assert_eq!(s.byte_size, 64);
        assert!(s.path.starts_with("signatures/42/"));
        assert!(s.path.ends_with(".png"));
        assert_eq!(blobs.paths(), vec![s.path.clone()]);

        let listed = g.list("42").await.unwrap();
        assert_eq!(listed, vec![s.clone()]);
        assert_eq!(g.get(&s.id).await.unwrap(), Some(s.clone()));
        assert_eq!(g.content(&s).await.unwrap(), png(64));
    }

    #[tokio::test]
    async fn list_is_newest_first_with_distinct_ids() {
        let (g, _) = gallery();
        let mut enrolled = Vec::new();
        for _ in 0..4 {
            enrolled.push(g.enroll("42", NewSample::new(png(32), "image/png")).await.unwrap());
        }
        let listed = g.list("42").await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        let expected: Vec<&str> = enrolled.iter().rev().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, expected);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 4);
        assert_eq!(g.count("42").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn unknown_identity_has_empty_gallery() {
        let (g, _) = gallery();
        assert!(g.list("nobody").await.unwrap().is_empty());
        assert!(g.list("bad:id").await.unwrap().is_empty());
        assert_eq!(g.get_primary("nobody").await.unwrap(), None);
        assert_eq!(g.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn galleries_are_partitioned_by_identity() {
        let (g, _) = gallery();
        g.enroll("42", NewSample::new(png(32), "image/png")).await.unwrap();
        g.enroll("420", NewSample::new(jpeg(32), "image/jpeg")).await.unwrap();
        assert_eq!(g.list("42").await.unwrap().len(), 1);
        assert_eq!(g.list("420").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_sample_writes_nothing() {
        let (g, blobs) = gallery();
        let err = g
            .enroll("42", NewSample::new(png(32), "image/gif"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignatureError::Validation(Rejection::UnsupportedMediaType(_))
        ));
        assert!(blobs.is_empty());
        assert!(g.list("42").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_identity_is_refused() {
        let (g, _) = gallery();
        let err = g
            .enroll("../etc", NewSample::new(png(32), "image/png"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignatureError::InvalidIdentity(_)));
    }

    #[tokio::test]
    async fn metadata_failure_removes_binary() {
        let blobs = MemoryBlobStore::new();
        let g = GalleryStore::new(
            Arc::new(ReadOnlyKv(MemoryStore::new())),
            Arc::new(blobs.clone()),
        );
        let err = g
            .enroll("42", NewSample::new(png(32), "image/png"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignatureError::Persistence(_)));
        assert!(blobs.is_empty(), "orphan binaries: {:?}", blobs.paths());
        assert!(g.list("42").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_enrollment_removes_binary() {
        let kv = MemoryStore::new();
        let blobs = MemoryBlobStore::new();
        let g = GalleryStore::new(
            Arc::new(kv.clone()),
            Arc::new(StallingBlobs(blobs.clone())),
        );

        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            g.enroll("42", NewSample::new(png(32), "image/png")),
        )
        .await;
        assert!(outcome.is_err());
        // Removal runs on a spawned task that has not been polled yet.
        assert_eq!(blobs.len(), 1);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !blobs.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("orphan binary left behind");
        assert!(g.list("42").await.unwrap().is_empty());
        assert!(kv.scan(DEFAULT_PREFIX).unwrap().is_empty());
    }

    #[tokio::test]
    async fn primary_defaults_to_newest() {
        let (g, _) = gallery();
        g.enroll("42", NewSample::new(png(32), "image/png")).await.unwrap();
        let newest = g.enroll("42", NewSample::new(png(32), "image/png")).await.unwrap();
        assert_eq!(g.get_primary("42").await.unwrap(), Some(newest));
    }

    #[tokio::test]
    async fn explicit_primary_survives_new_enrollments() {
        let (g, _) = gallery();
        let first = g.enroll("42", NewSample::new(png(32), "image/png")).await.unwrap();
        g.enroll("42", NewSample::new(png(32), "image/png")).await.unwrap();

        g.set_primary("42", &first.id).await.unwrap();
        g.enroll("42", NewSample::new(png(32), "image/png")).await.unwrap();
        assert_eq!(g.get_primary("42").await.unwrap(), Some(first.clone()));

        // Idempotent.
        g.set_primary("42", &first.id).await.unwrap();
        assert_eq!(g.get_primary("42").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn set_primary_requires_membership() {
        let (g, _) = gallery();
        let other = g.enroll("7", NewSample::new(png(32), "image/png")).await.unwrap();
        g.enroll("42", NewSample::new(png(32), "image/png")).await.unwrap();

        let err = g.set_primary("42", &other.id).await.unwrap_err();
        assert!(matches!(err, SignatureError::NotMember { .. }));
        let err = g.set_primary("42", "no-such-sample").await.unwrap_err();
        assert!(matches!(err, SignatureError::NotMember { .. }));
    }

    #[tokio::test]
    async fn custom_prefix_and_bucket() {
        let kv = MemoryStore::new();
        let blobs = MemoryBlobStore::new();
        let g = GalleryStore::new(Arc::new(kv.clone()), Arc::new(blobs.clone()))
            .with_prefix("t1")
            .with_bucket("ink");
        let s = g.enroll("42", NewSample::new(png(32), "image/png")).await.unwrap();
        assert!(s.path.starts_with("ink/42/"));
        assert_eq!(kv.scan("t1:smp:42:").unwrap().len(), 1);
    }
}
