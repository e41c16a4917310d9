//! The face-matching capability and the per-frame recognition pipeline built on it.

use crate::alignment;
use crate::detector::{DetectorError, FaceDetector};
use crate::encoder::{EncoderError, FaceEncoder};
use crate::types::{DetectedFace, Embedding, FaceBox, KnownFace, Recognition};
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

/// Default maximum distance at which two embeddings are the same person.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Default factor by which frames are shrunk before detection.
pub const DEFAULT_DOWNSCALE: u32 = 4;

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("invalid frame: expected {expected} RGB bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
}

/// Detection, embedding and comparison of faces.
///
/// Only `detect_and_encode` is model-specific; the comparison methods default
/// to Euclidean distance against a fixed tolerance.
pub trait FaceMatcher: Send {
    /// Find every face in an RGB8 image and compute its embedding.
    fn detect_and_encode(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectedFace>, MatcherError>;

    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        a.distance(b)
    }

    /// One flag per known embedding: is it within `tolerance` of `candidate`?
    fn matches(&self, known: &[Embedding], candidate: &Embedding, tolerance: f32) -> Vec<bool> {
        known
            .iter()
            .map(|k| self.distance(k, candidate) <= tolerance)
            .collect()
    }
}

/// Map a distance to a confidence score in [0, 1].
pub fn confidence_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Pick the closest roster entry for `candidate`.
///
/// Returns the index and distance of the first minimum-distance entry, but
/// only when `matches` also accepts that entry.
pub fn best_match(
    matcher: &dyn FaceMatcher,
    roster: &[KnownFace],
    candidate: &Embedding,
    tolerance: f32,
) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, known) in roster.iter().enumerate() {
        let d = matcher.distance(&known.embedding, candidate);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((i, d)),
        }
    }

    let (idx, distance) = best?;
    let known: Vec<Embedding> = roster.iter().map(|k| k.embedding).collect();
    let accepted = matcher
        .matches(&known, candidate, tolerance)
        .get(idx)
        .copied()
        .unwrap_or(false);

    accepted.then_some((idx, distance))
}

/// Recognizes roster members in full-resolution camera frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameRecognizer {
    pub tolerance: f32,
    /// Detection runs on a frame shrunk by this factor; boxes are scaled back up.
    pub downscale: u32,
}

impl Default for FrameRecognizer {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            downscale: DEFAULT_DOWNSCALE,
        }
    }
}

impl FrameRecognizer {
    pub fn new(tolerance: f32, downscale: u32) -> Self {
        Self {
            tolerance,
            downscale: downscale.max(1),
        }
    }

    /// Detect, encode and match every face in an RGB8 frame.
    pub fn recognize(
        &self,
        matcher: &mut dyn FaceMatcher,
        rgb: &[u8],
        width: u32,
        height: u32,
        roster: &[KnownFace],
    ) -> Result<Vec<Recognition>, MatcherError> {
        let expected = (width * height * 3) as usize;
        if rgb.len() < expected {
            return Err(MatcherError::InvalidFrame {
                expected,
                actual: rgb.len(),
            });
        }
        if roster.is_empty() {
            return Ok(Vec::new());
        }

        let factor = self.downscale.max(1);
        let faces = if factor == 1 {
            matcher.detect_and_encode(&rgb[..expected], width, height)?
        } else {
            let small = shrink(&rgb[..expected], width, height, factor).ok_or(
                MatcherError::InvalidFrame {
                    expected,
                    actual: rgb.len(),
                },
            )?;
            matcher.detect_and_encode(small.as_raw(), small.width(), small.height())?
        };

        let mut recognized = Vec::new();
        for face in faces {
            let Some((idx, distance)) =
                best_match(matcher, roster, &face.embedding, self.tolerance)
            else {
                continue;
            };
            let known = &roster[idx];
            recognized.push(Recognition {
                student_id: known.student_id,
                name: known.name.clone(),
                confidence: confidence_from_distance(distance),
                location: face.location.scaled(factor),
            });
        }

        Ok(recognized)
    }
}

fn shrink(rgb: &[u8], width: u32, height: u32, factor: u32) -> Option<RgbImage> {
    let img = RgbImage::from_raw(width, height, rgb.to_vec())?;
    let w = (width / factor).max(1);
    let h = (height / factor).max(1);
    Some(imageops::resize(&img, w, h, FilterType::Triangle))
}

/// ONNX-backed matcher: SCRFD detection, landmark alignment, 128-d encoder.
pub struct OnnxFaceMatcher {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxFaceMatcher {
    pub fn load(detector_path: &str, encoder_path: &str) -> Result<Self, MatcherError> {
        Ok(Self {
            detector: FaceDetector::load(detector_path)?,
            encoder: FaceEncoder::load(encoder_path)?,
        })
    }
}

impl FaceMatcher for OnnxFaceMatcher {
    fn detect_and_encode(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectedFace>, MatcherError> {
        let expected = (width * height * 3) as usize;
        let image = RgbImage::from_raw(width, height, rgb.to_vec()).ok_or(
            MatcherError::InvalidFrame {
                expected,
                actual: rgb.len(),
            },
        )?;

        let detections = self.detector.detect(&image)?;
        let mut faces = Vec::with_capacity(detections.len());
        for det in detections {
            let Some(landmarks) = det.landmarks else {
                tracing::debug!(score = det.score, "skipping detection without landmarks");
                continue;
            };
            let aligned = alignment::align_face(&image, &landmarks);
            let embedding = self.encoder.encode(&aligned)?;
            faces.push(DetectedFace {
                embedding,
                location: FaceBox {
                    top: det.y1.round() as i32,
                    right: det.x2.round() as i32,
                    bottom: det.y2.round() as i32,
                    left: det.x1.round() as i32,
                },
            });
        }

        Ok(faces)
    }
}
