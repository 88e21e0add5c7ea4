//! Signature enrollment and verification.
//!
//! Handwriting samples are collected per identity into a gallery
//! ([`GalleryStore`]), each identity carries a training profile
//! ([`TrainingTracker`]) that tracks whether the recognition backend has been
//! trained on it, and a [`Verifier`] decides whether a probe was written by
//! the claimed identity.
//!
//! # Verification paths
//!
//! - **Backend**: the recognition backend classifies the probe and its
//!   decision is used as is (score clamped to `[0, 1]`).
//! - **Gallery**: the probe is enrolled, then scored against every other
//!   sample of the identity with a [`Comparator`] ([`ContentComparator`] by
//!   default). The best score is accepted when it reaches the identity's
//!   threshold (inclusive).
//!
//! In [`VerifyMode::Auto`] the backend is used when healthy and the gallery
//! otherwise, including when a backend call turns out to be unavailable.
//!
//! # Storage
//!
//! Metadata lives in an [`autograph_kv::KVStore`] as msgpack records;
//! binary content lives in a [`BlobStore`]. See [`keys`] for the layout.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use autograph_kv::MemoryStore;
//! use autograph_recognition::Offline;
//! use autograph_signature::{MemoryBlobStore, NewSample, Session, SignatureService};
//!
//! # async fn run(image: Vec<u8>) -> Result<(), autograph_signature::SignatureError> {
//! let service = SignatureService::builder(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryBlobStore::new()),
//!     Arc::new(Offline),
//! )
//! .build();
//!
//! let session = Session::new("instructor-1");
//! service
//!     .enroll(&session, "42", NewSample::new(image.clone(), "image/png"))
//!     .await?;
//! let result = service
//!     .verify(&session, "42", NewSample::new(image, "image/png"), None)
//!     .await?;
//! println!("{} ({:.2})", result.decision, result.score);
//! # Ok(())
//! # }
//! ```

mod blob;
mod engine;
mod error;
mod gallery;
pub mod keys;
mod profile;
mod service;
mod similarity;
mod types;
mod validator;


pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use engine::{Verifier, VerifierConfig, VerifyMode};
pub use error::SignatureError;
pub use gallery::{DEFAULT_BUCKET, DEFAULT_PREFIX, GalleryStore};
pub use profile::{CANCELLED, DEFAULT_THRESHOLD, DEFAULT_TRAINING_LEASE, TrainingTracker};
pub use service::{SignatureService, SignatureServiceBuilder};
pub use similarity::{
    Comparator, ContentComparator, FeatureComparator, best_match, clamp_score, cosine_similarity,
};
pub use types::{
    CaptureMetadata, INSUFFICIENT_ENROLLMENT, NewSample, Sample, Session, TrainingProfile,
    TrainingStatus, VerificationResult, VerifyPath, is_valid_identity,
};
pub use validator::{
    DEFAULT_MAX_BYTES, MediaType, Rejection, SampleValidator, ValidationOutcome, ValidatorConfig,
};

pub use autograph_recognition::{Decision, Health, TrainingOutcome};
