//! Client adapter for the external signature recognition backend.
//!
//! The backend owns feature extraction, per-identity training and
//! server-side classification. This crate models its contract as the
//! [`Recognizer`] trait, validates every response payload into typed values
//! at the boundary, and reports any transport or protocol failure as a
//! uniform [`RecognitionError::Unavailable`].
//!
//! ```rust,no_run
//! use autograph_recognition::{HttpRecognizer, Recognizer};
//!
//! # async fn run() -> Result<(), autograph_recognition::RecognitionError> {
//! let backend = HttpRecognizer::builder("http://localhost:8000")
//!     .api_key("secret")
//!     .max_retries(1)
//!     .build()?;
//! if backend.health().await.healthy {
//!     let outcome = backend.train("42").await?;
//!     println!("trained on {} samples", outcome.sample_count);
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod http;
mod recognizer;
mod types;

pub use error::RecognitionError;
pub use http::{
    DEFAULT_HEALTH_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF, DEFAULT_TIMEOUT,
    HttpRecognizer, HttpRecognizerBuilder, MAX_RETRY_BACKOFF,
};
pub use recognizer::{Offline, Recognizer};
pub use types::{BackendVerification, Decision, Health, TrainingOutcome};
