use thiserror::Error;

use autograph_kv::KVError;
use autograph_recognition::RecognitionError;

use crate::validator::Rejection;

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("signature: sample rejected: {0}")]
    Validation(Rejection),

    #[error("signature: invalid identity id {0:?}")]
    InvalidIdentity(String),

    #[error("signature: persistence error: {0}")]
    Persistence(String),

    #[error("signature: sample {sample_id} is not in the gallery of {identity_id}")]
    NotMember {
        identity_id: String,
        sample_id: String,
    },

    #[error("signature: training already in progress for {0}")]
    AlreadyInProgress(String),

    #[error("signature: threshold {0} outside [0, 1]")]
    InvalidThreshold(f32),

    #[error("signature: comparison failed: {0}")]
    Comparison(String),

    #[error("signature: {0}")]
    Recognition(#[from] RecognitionError),

    #[error("signature: serialization error: {0}")]
    Serialization(String),
}

impl From<KVError> for SignatureError {
    fn from(e: KVError) -> Self {
        SignatureError::Persistence(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for SignatureError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SignatureError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SignatureError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SignatureError::Serialization(e.to_string())
    }
}
