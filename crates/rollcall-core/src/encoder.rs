//! 128-dimensional face encoder via ONNX Runtime.
//!
//! Takes a 112×112 aligned RGB crop and returns a unit-length embedding.

use crate::alignment::ALIGNED_SIZE;
use crate::types::{Embedding, EMBEDDING_DIM};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// The encoder consumes raw 0..255 RGB values.
const ENCODER_MEAN: f32 = 0.0;
const ENCODER_STD: f32 = 1.0;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("encoder model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("aligned crop must be {ALIGNED_SIZE}x{ALIGNED_SIZE}, got {0}x{1}")]
    BadCrop(u32, u32),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    pub fn load(model_path: &str) -> Result<Self, EncoderError> {
        if !Path::new(model_path).exists() {
            return Err(EncoderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded face encoder"
        );

        Ok(Self { session })
    }

    pub fn encode(&mut self, aligned: &RgbImage) -> Result<Embedding, EncoderError> {
        let input = to_tensor(aligned)?;
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("embedding output: {e}")))?;

        let embedding = Embedding::try_from(raw).map_err(|e| {
            EncoderError::InferenceFailed(format!(
                "model must emit {EMBEDDING_DIM} finite values: {e}"
            ))
        })?;

        Ok(embedding.normalized())
    }
}

/// Lay out an aligned crop as a 1×3×112×112 NCHW tensor.
fn to_tensor(aligned: &RgbImage) -> Result<Array4<f32>, EncoderError> {
    let size = ALIGNED_SIZE as usize;
    if aligned.width() != ALIGNED_SIZE || aligned.height() != ALIGNED_SIZE {
        return Err(EncoderError::BadCrop(aligned.width(), aligned.height()));
    }

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (px.0[c] as f32 - ENCODER_MEAN) / ENCODER_STD;
        }
    }
    Ok(tensor)
}
