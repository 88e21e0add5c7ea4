//! Intake checks applied before a sample may enter a gallery.
//!
//! Validation failure is data: [`SampleValidator::validate`] never returns an
//! error, it returns a [`ValidationOutcome`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default size cap for a single sample (2 MiB, inclusive).
pub const DEFAULT_MAX_BYTES: u64 = 2 * 1024 * 1024;

/// Image formats a sample may be stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    #[serde(rename = "image/png")]
    Png,
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/webp")]
    Webp,
}

impl MediaType {
    pub const ALL: [MediaType; 3] = [MediaType::Png, MediaType::Jpeg, MediaType::Webp];

    /// Parse a declared media type. Case-insensitive; parameters after `;`
    /// are ignored and `image/jpg` is accepted as an alias.
    pub fn parse(declared: &str) -> Option<Self> {
        let essence = declared.split(';').next()?.trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(MediaType::Png),
            "image/jpeg" | "image/jpg" => Some(MediaType::Jpeg),
            "image/webp" => Some(MediaType::Webp),
            _ => None,
        }
    }

    /// Guess the media type from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(MediaType::Png),
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "webp" => Some(MediaType::Webp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Png => "image/png",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MediaType::Png => "png",
            MediaType::Jpeg => "jpg",
            MediaType::Webp => "webp",
        }
    }

    /// Reports whether `content` starts with this format's signature bytes.
    pub fn matches_content(&self, content: &[u8]) -> bool {
        match self {
            MediaType::Png => content.starts_with(b"\x89PNG\r\n\x1a\n"),
            MediaType::Jpeg => content.starts_with(&[0xFF, 0xD8, 0xFF]),
            MediaType::Webp => {
                content.len() >= 12 && &content[..4] == b"RIFF" && &content[8..12] == b"WEBP"
            }
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a sample was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("unsupported media type {0:?}")]
    UnsupportedMediaType(String),

    #[error("sample is empty")]
    Empty,

    #[error("sample is {size} bytes, limit is {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("declared size {declared} does not match content length {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("content is not a valid {declared}")]
    ContentMismatch { declared: MediaType },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Accepted(MediaType),
    Rejected(Rejection),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted(_))
    }
}

/// Builder-style configuration for [`SampleValidator`].
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub max_bytes: u64,
    pub allowed: Vec<MediaType>,
    /// Require the content's leading bytes to match the declared type.
    pub check_content: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            allowed: MediaType::ALL.to_vec(),
            check_content: true,
        }
    }
}

impl ValidatorConfig {
    pub fn with_max_bytes(mut self, max: u64) -> Self {
        self.max_bytes = max;
        self
    }

    pub fn with_allowed(mut self, allowed: &[MediaType]) -> Self {
        self.allowed = allowed.to_vec();
        self
    }

    pub fn with_content_check(mut self, enabled: bool) -> Self {
        self.check_content = enabled;
        self
    }
}

/// Pure intake validator.
#[derive(Debug, Clone, Default)]
pub struct SampleValidator {
    config: ValidatorConfig,
}

impl SampleValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Check a candidate sample.
    ///
    /// Checks run in order: media type, size cap, emptiness, declared size,
    /// content signature. The first failing check decides the rejection.
    pub fn validate(
        &self,
        content: &[u8],
        declared_media_type: &str,
        byte_size: u64,
    ) -> ValidationOutcome {
        let media_type = match MediaType::parse(declared_media_type) {
            Some(m) if self.config.allowed.contains(&m) => m,
            _ => {
                return ValidationOutcome::Rejected(Rejection::UnsupportedMediaType(
                    declared_media_type.to_string(),
                ));
            }
        };

        let actual = content.len() as u64;
        let size = byte_size.max(actual);
        if size > self.config.max_bytes {
            return ValidationOutcome::Rejected(Rejection::TooLarge {
                size,
                max: self.config.max_bytes,
            });
        }
        if actual == 0 {
            return ValidationOutcome::Rejected(Rejection::Empty);
        }
        if byte_size != actual {
            return ValidationOutcome::Rejected(Rejection::SizeMismatch {
                declared: byte_size,
                actual,
            });
        }
        if self.config.check_content && !media_type.matches_content(content) {
            return ValidationOutcome::Rejected(Rejection::ContentMismatch {
                declared: media_type,
            });
        }

        ValidationOutcome::Accepted(media_type)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// A PNG-signed payload of exactly `len` bytes (`len >= 8`).
    pub(crate) fn png(len: usize) -> Vec<u8> {
        let mut v = b"\x89PNG\r\n\x1a\n".to_vec();
        v.resize(len.max(8), 0);
        v
    }

    pub(crate) fn jpeg(len: usize) -> Vec<u8> {
        let mut v = vec![0xFF, 0xD8, 0xFF, 0xE0];
        v.resize(len.max(4), 0);
        v
    }

    pub(crate) fn webp(len: usize) -> Vec<u8> {
        let mut v = b"RIFF\0\0\0\0WEBP".to_vec();
        v.resize(len.max(12), 0);
        v
    }
}
