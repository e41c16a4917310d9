//! SCRFD face detector via ONNX Runtime, fed with RGB frames.
//!
//! The frame is letterboxed into a square input, the three stride heads are
//! decoded into boxes plus five landmarks, and overlapping boxes are merged
//! with non-maximum suppression.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_THRESHOLD: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A face box in source-frame pixels, corners inclusive of the face.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    /// Left eye, right eye, nose, left mouth corner, right mouth corner.
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl Detection {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Detection) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Placement of the resized frame inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((INPUT_SIZE as f32 - new_w) / 2.0).floor(),
            pad_y: ((INPUT_SIZE as f32 - new_h) / 2.0).floor(),
        }
    }

    /// Map a point in model-input space back to the source frame.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

pub struct FaceDetector {
    session: Session,
    /// (score, bbox, kps) output positions for each stride.
    heads: [(usize, usize, usize); 3],
}

impl FaceDetector {
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps for 3 strides), model has {}",
                names.len()
            )));
        }

        let heads = head_layout(&names);
        tracing::info!(path = model_path, outputs = ?names, ?heads, "loaded SCRFD detector");

        Ok(Self { session, heads })
    }

    /// Detect faces, highest score first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let letterbox = Letterbox::fit(image.width(), image.height());
        let input = to_tensor(image, &letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (head, &stride) in self.heads.iter().zip(STRIDES.iter()) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| {
                        DetectorError::InferenceFailed(format!("{what} for stride {stride}: {e}"))
                    })
            };
            let scores = extract(head.0, "scores")?;
            let boxes = extract(head.1, "boxes")?;
            let kps = extract(head.2, "landmarks")?;
            candidates.extend(decode(scores, boxes, kps, stride, &letterbox));
        }

        Ok(suppress(candidates, NMS_THRESHOLD))
    }
}

/// Resolve output positions from tensor names like `score_8`, falling back
/// to the usual `[scores.., boxes.., kps..]` ordering.
fn head_layout(names: &[String]) -> [(usize, usize, usize); 3] {
    let position = |kind: &str, stride: u32| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let mut layout = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
    for (slot, &stride) in layout.iter_mut().zip(STRIDES.iter()) {
        match (
            position("score", stride),
            position("bbox", stride),
            position("kps", stride),
        ) {
            (Some(s), Some(b), Some(k)) => *slot = (s, b, k),
            _ => return [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
        }
    }
    layout
}

fn to_tensor(image: &RgbImage, letterbox: &Letterbox) -> Array4<f32> {
    let new_w = ((image.width() as f32 * letterbox.scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((image.height() as f32 * letterbox.scale).round() as u32).clamp(1, INPUT_SIZE);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Zero is the normalized value of the mean pixel, so padding stays neutral.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (ox, oy) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, px) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + ox, y as usize + oy);
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (px.0[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}

/// Turn one stride head's raw outputs into source-frame detections.
fn decode(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: u32,
    letterbox: &Letterbox,
) -> Vec<Detection> {
    let cells_per_row = (INPUT_SIZE / stride) as usize;
    let s = stride as f32;

    scores
        .iter()
        .enumerate()
        .filter(|&(_, &score)| score > SCORE_THRESHOLD)
        .filter_map(|(idx, &score)| {
            let cell = idx / ANCHORS_PER_CELL;
            let ax = (cell % cells_per_row) as f32 * s;
            let ay = (cell / cells_per_row) as f32 * s;

            let b = boxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(ax - b[0] * s, ay - b[1] * s);
            let (x2, y2) = letterbox.unmap(ax + b[2] * s, ay + b[3] * s);

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s))
            });

            Some(Detection {
                x1,
                y1,
                x2,
                y2,
                score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by descending score.
fn suppress(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::new();
    for det in candidates {
        if kept.iter().all(|k| k.iou(&det) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}
