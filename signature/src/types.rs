use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use autograph_recognition::{Decision, TrainingOutcome};

use crate::validator::MediaType;

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// Client-side capture context. Informational only; never used in matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub screen_resolution: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timezone: String,
}

/// One enrolled signature. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub identity_id: String,

    /// Blob path of the binary content: `{bucket}/{identity_id}/{random}.{ext}`.
    pub path: String,

    pub media_type: MediaType,
    pub byte_size: u64,

    #[serde(default)]
    pub capture: CaptureMetadata,

    pub created_at: DateTime<Utc>,

    /// Monotonic enrollment sequence (unix nanoseconds, strictly increasing
    /// within a process). Orders the gallery.
    pub seq: i64,

    /// Backend-assigned quality in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f32>,

    /// Backend-computed feature vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<f32>>,
}

/// Input to an enrollment.
#[derive(Debug, Clone, Default)]
pub struct NewSample {
    pub content: Vec<u8>,
    /// Media type as declared by the client.
    pub media_type: String,
    /// Size declared by the client; defaults to `content.len()`.
    pub declared_size: Option<u64>,
    pub capture: CaptureMetadata,
    pub quality: Option<f32>,
    pub features: Option<Vec<f32>>,
}

impl NewSample {
    pub fn new(content: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            content,
            media_type: media_type.into(),
            ..Default::default()
        }
    }

    pub fn with_capture(mut self, capture: CaptureMetadata) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }

    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_features(mut self, features: Vec<f32>) -> Self {
        self.features = Some(features);
        self
    }

    /// The size the validator checks against the cap.
    pub fn byte_size(&self) -> u64 {
        self.declared_size.unwrap_or(self.content.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Training profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    Untrained,
    Training,
    Ready,
    Error,
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingStatus::Untrained => f.write_str("untrained"),
            TrainingStatus::Training => f.write_str("training"),
            TrainingStatus::Ready => f.write_str("ready"),
            TrainingStatus::Error => f.write_str("error"),
        }
    }
}

/// Per-identity readiness record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingProfile {
    pub identity_id: String,
    pub status: TrainingStatus,

    /// Samples used by the last successful training.
    pub sample_count: usize,

    pub threshold: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Vec<f32>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_trained_at: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,

    /// Set only while `status == Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Incremented each time training starts; ties a completion to the
    /// request that started it.
    #[serde(default)]
    pub attempt: u64,
}

impl TrainingProfile {
    pub fn new(identity_id: &str, threshold: f32) -> Self {
        Self {
            identity_id: identity_id.to_string(),
            status: TrainingStatus::Untrained,
            sample_count: 0,
            threshold,
            centroid: None,
            last_trained_at: None,
            updated_at: Utc::now(),
            error_message: None,
            attempt: 0,
        }
    }

    pub(crate) fn start_training(mut self) -> Self {
        self.status = TrainingStatus::Training;
        self.attempt += 1;
        self.error_message = None;
        self.updated_at = Utc::now();
        self
    }

    pub(crate) fn complete(mut self, outcome: TrainingOutcome) -> Self {
        let now = Utc::now();
        self.status = TrainingStatus::Ready;
        self.sample_count = outcome.sample_count;
        if let Some(t) = outcome.threshold {
            self.threshold = t;
        }
        if outcome.centroid.is_some() {
            self.centroid = outcome.centroid;
        }
        self.last_trained_at = Some(now);
        self.updated_at = now;
        self.error_message = None;
        self
    }

    /// Sample count, threshold, centroid and last-trained time are kept.
    pub(crate) fn fail(mut self, message: &str) -> Self {
        self.status = TrainingStatus::Error;
        self.error_message = Some(if message.is_empty() {
            "training failed".to_string()
        } else {
            message.to_string()
        });
        self.updated_at = Utc::now();
        self
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Message attached to the empty-gallery outcome.
pub const INSUFFICIENT_ENROLLMENT: &str = "insufficient enrollment data";

/// Which decision path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyPath {
    Backend,
    Gallery,
}

/// Outcome of one verification attempt. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub matched: bool,
    pub identity_id: Option<String>,
    /// Best-scoring gallery sample (gallery path only).
    pub sample_id: Option<String>,
    /// Confidence in `[0, 1]`.
    pub score: f32,
    pub decision: Decision,
    pub message: String,
    pub path: VerifyPath,
}

impl VerificationResult {
    pub(crate) fn error(path: VerifyPath, message: impl Into<String>) -> Self {
        Self {
            matched: false,
            identity_id: None,
            sample_id: None,
            score: 0.0,
            decision: Decision::Error,
            message: message.into(),
            path,
        }
    }

    pub(crate) fn insufficient() -> Self {
        Self {
            matched: false,
            identity_id: None,
            sample_id: None,
            score: 0.0,
            decision: Decision::NoMatch,
            message: INSUFFICIENT_ENROLLMENT.to_string(),
            path: VerifyPath::Gallery,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Caller context passed explicitly to every service operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Who is acting (e.g. an instructor's account id).
    pub actor: String,
    pub request_id: String,
}

impl Session {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            request_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

static LAST_SEQ: AtomicI64 = AtomicI64::new(0);

/// Strictly increasing unix-nanosecond sequence.
pub(crate) fn next_seq() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default();
    loop {
        let old = LAST_SEQ.load(Ordering::Relaxed);
        let next = if now > old { now } else { old + 1 };
        if LAST_SEQ
            .compare_exchange_weak(old, next, Ordering::Release, Ordering::Relaxed)
            .is_ok()
        {
            return next;
        }
    }
}

/// Identity ids become key and path segments, so they are restricted to
/// ASCII alphanumerics, `-`, `_` and `.` (not `.`/`..`), at most 128 bytes.
pub fn is_valid_identity(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id != "."
        && id != ".."
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_strictly_increasing() {
        let mut prev = next_seq();
        for _ in 0..1000 {
            let next = next_seq();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn identity_charset() {
        assert!(is_valid_identity("42"));
        assert!(is_valid_identity("stu-2026_a.b"));
        assert!(!is_valid_identity(""));
        assert!(!is_valid_identity(".."));
        assert!(!is_valid_identity("a:b"));
        assert!(!is_valid_identity("a/b"));
        assert!(!is_valid_identity(&"x".repeat(129)));
    }

    #[test]
    fn failure_preserves_training_bookkeeping() {
        let ready = TrainingProfile::new("42", 0.7).start_training().complete(TrainingOutcome {
            success: true,
            message: String::new(),
            sample_count: 5,
            centroid: Some(vec![0.1]),
            threshold: Some(0.8),
            error: None,
        });
        let trained_at = ready.last_trained_at;

        let failed = ready.start_training().fail("");
        assert_eq!(failed.status, TrainingStatus::Error);
        assert_eq!(failed.error_message.as_deref(), Some("training failed"));
        assert_eq!(failed.sample_count, 5);
        assert_eq!(failed.threshold, 0.8);
        assert_eq!(failed.centroid, Some(vec![0.1]));
        assert_eq!(failed.last_trained_at, trained_at);
        assert_eq!(failed.attempt, 2);
    }

    #[test]
    fn profile_msgpack_roundtrip_keeps_optional_fields() {
        let p = TrainingProfile::new("42", 0.7).start_training().fail("timeout");
        let data = rmp_serde::to_vec_named(&p).unwrap();
        let back: TrainingProfile = rmp_serde::from_slice(&data).unwrap();
        assert_eq!(back, p);
    }
}
