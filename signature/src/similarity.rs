//! Sample scoring and best-match selection.

use std::sync::Arc;

use image::imageops::FilterType;

use crate::blob::BlobStore;
use crate::error::SignatureError;
use crate::types::Sample;

/// Thumbnail size used by [`ContentComparator`]. Signatures are wide.
const THUMB_WIDTH: u32 = 64;
const THUMB_HEIGHT: u32 = 24;

/// Comparator scores how likely two samples were written by the same hand.
///
/// Scores are expected in `[0, 1]`; the engine clamps whatever comes back.
#[async_trait::async_trait]
pub trait Comparator: Send + Sync {
    async fn compare(&self, probe: &Sample, candidate: &Sample) -> Result<f32, SignatureError>;
}

/// Cosine similarity over the backend-computed feature vectors.
///
/// A sample without features, or a dimension mismatch, is a comparison
/// failure rather than a zero score.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureComparator;

#[async_trait::async_trait]
impl Comparator for FeatureComparator {
    async fn compare(&self, probe: &Sample, candidate: &Sample) -> Result<f32, SignatureError> {
        let (Some(a), Some(b)) = (&probe.features, &candidate.features) else {
            return Err(SignatureError::Comparison(format!(
                "sample {} has no features",
                if probe.features.is_none() { &probe.id } else { &candidate.id }
            )));
        };
        if a.len() != b.len() || a.is_empty() {
            return Err(SignatureError::Comparison(format!(
                "feature dimensions differ: {} vs {}",
                a.len(),
                b.len()
            )));
        }
        Ok(cosine_similarity(a, b))
    }
}

/// Compares the enrolled binaries themselves.
///
/// Both images are decoded, reduced to a grayscale thumbnail and scored by
/// the correlation of their ink intensities. Content the decoder cannot read
/// is scored by its byte histogram instead, so every accepted sample yields a
/// score. When both samples carry features of the same dimension those are
/// used directly.
#[derive(Clone)]
pub struct ContentComparator {
    blobs: Arc<dyn BlobStore>,
}

impl ContentComparator {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

#[async_trait::async_trait]
impl Comparator for ContentComparator {
    async fn compare(&self, probe: &Sample, candidate: &Sample) -> Result<f32, SignatureError> {
        if let (Some(a), Some(b)) = (&probe.features, &candidate.features) {
            if a.len() == b.len() && !a.is_empty() {
                return Ok(cosine_similarity(a, b));
            }
        }

        let (a, b) = tokio::try_join!(
            self.blobs.get(&probe.path),
            self.blobs.get(&candidate.path)
        )?;
        tokio::task::spawn_blocking(move || cosine_similarity(&descriptor(&a), &descriptor(&b)))
            .await
            .map_err(|e| SignatureError::Comparison(format!("comparison task: {e}")))
    }
}

/// Mean-centred ink intensities of a grayscale thumbnail, or the normalised
/// byte histogram when the content does not decode.
fn descriptor(content: &[u8]) -> Vec<f32> {
    match image::load_from_memory(content) {
        Ok(img) => {
            let thumb = img
                .resize_exact(THUMB_WIDTH, THUMB_HEIGHT, FilterType::Triangle)
                .to_luma8();
            let ink: Vec<f32> = thumb.pixels().map(|p| 1.0 - p.0[0] as f32 / 255.0).collect();
            let mean = ink.iter().sum::<f32>() / ink.len().max(1) as f32;
            ink.into_iter().map(|v| v - mean).collect()
        }
        Err(_) => {
            let mut hist = vec![0f32; 256];
            for &b in content {
                hist[b as usize] += 1.0;
            }
            hist
        }
    }
}

/// Cosine similarity in `[-1, 1]`, computed in f64.
///
/// Returns 0 for zero vectors or mismatched dimensions.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot: f64 = 0.0;
    let mut norm_a: f64 = 0.0;
    let mut norm_b: f64 = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Clamp a score into `[0, 1]`. NaN becomes 0.
pub fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// The highest-scoring item. On ties the earliest item wins.
pub fn best_match<T>(scored: impl IntoIterator<Item = (T, f32)>) -> Option<(T, f32)> {
    scored.into_iter().fold(None, |best, (item, score)| match best {
        Some((_, top)) if score <= top => best,
        _ => Some((item, score)),
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use std::io::Cursor;

    use image::{GrayImage, ImageFormat, Luma};

    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::types::CaptureMetadata;
    use crate::validator::MediaType;
    use crate::validator::fixtures::png;

    fn sample(id: &str, features: Option<Vec<f32>>) -> Sample {
        Sample {
            id: id.into(),
            identity_id: "42".into(),
            path: format!("signatures/42/{id}.png"),
            media_type: MediaType::Png,
            byte_size: 8,
            capture: CaptureMetadata::default(),
            created_at: Utc::now(),
            seq: 1,
            quality: None,
            features,
        }
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn clamp_handles_out_of_range_and_nan() {
        assert_eq!(clamp_score(-0.3), 0.0);
        assert_eq!(clamp_score(1.7), 1.0);
        assert_eq!(clamp_score(f32::NAN), 0.0);
        assert_eq!(clamp_score(0.42), 0.42);
    }

    #[test]
    fn best_match_prefers_first_on_ties() {
        let best = best_match(vec![("a", 0.5), ("b", 0.9), ("c", 0.9), ("d", 0.1)]);
        assert_eq!(best, Some(("b", 0.9)));
        assert_eq!(best_match(Vec::<(&str, f32)>::new()), None);
        assert_eq!(best_match(vec![("only", 0.0)]), Some(("only", 0.0)));
    }

    #[tokio::test]
    async fn feature_comparator() {
        let c = FeatureComparator;
        let probe = sample("p", Some(vec![1.0, 1.0]));
        let same = sample("s", Some(vec![2.0, 2.0]));
        let score = c.compare(&probe, &same).await.unwrap();
        assert!((score - 1.0).abs() < 1e-6);

        let bare = sample("b", None);
        assert!(matches!(
            c.compare(&probe, &bare).await,
            Err(SignatureError::Comparison(_))
        ));
        let wide = sample("w", Some(vec![1.0, 0.0, 0.0]));
        assert!(c.compare(&probe, &wide).await.is_err());
    }

    /// A white canvas with a dark stroke drawn by `ink`.
    fn stroke(ink: impl Fn(u32, u32) -> bool) -> Vec<u8> {
        let img = GrayImage::from_fn(120, 40, |x, y| {
            if ink(x, y) { Luma([20]) } else { Luma([250]) }
        });
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    async fn stored(blobs: &MemoryBlobStore, id: &str, content: &[u8]) -> Sample {
        let s = sample(id, None);
        blobs.put(&s.path, content).await.unwrap();
        s
    }

    #[tokio::test]
    async fn content_comparator_scores_decoded_images() {
        let blobs = MemoryBlobStore::new();
        let c = ContentComparator::new(Arc::new(blobs.clone()));

        let flat = stroke(|_, y| (18..22).contains(&y));
        let steep = stroke(|x, _| (58..62).contains(&x));
        let probe = stored(&blobs, "p", &flat).await;
        let same = stored(&blobs, "s", &flat).await;
        let other = stored(&blobs, "o", &steep).await;

        let same_score = c.compare(&probe, &same).await.unwrap();
        let other_score = c.compare(&probe, &other).await.unwrap();
        assert!((same_score - 1.0).abs() < 1e-4, "{same_score}");
        assert!(other_score < same_score);
    }

    #[tokio::test]
    async fn content_comparator_handles_undecodable_content() {
        let blobs = MemoryBlobStore::new();
        let c = ContentComparator::new(Arc::new(blobs.clone()));
        let a = stored(&blobs, "a", &png(64)).await;
        let b = stored(&blobs, "b", &png(64)).await;
        let score = c.compare(&a, &b).await.unwrap();
        assert!((score - 1.0).abs() < 1e-6);

        // Missing binaries fail the comparison.
        let ghost = sample("ghost", None);
        assert!(c.compare(&a, &ghost).await.is_err());
    }

    #[tokio::test]
    async fn content_comparator_prefers_features() {
        let c = ContentComparator::new(Arc::new(MemoryBlobStore::new()));
        let a = sample("a", Some(vec![1.0, 0.0]));
        let b = sample("b", Some(vec![0.0, 1.0]));
        assert!(c.compare(&a, &b).await.unwrap().abs() < 1e-6);
    }
}
