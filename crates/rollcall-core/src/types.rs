use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of dimensions in a face embedding.
pub const EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("expected {EMBEDDING_DIM}-dim embedding, got {0}")]
    Dimension(usize),
    #[error("embedding value at index {0} is not finite")]
    NonFinite(usize),
    #[error("malformed embedding: {0}")]
    Malformed(String),
}

/// Fixed-length face embedding produced by a [`FaceMatcher`](crate::FaceMatcher).
///
/// Serialized as a plain JSON array; deserialization rejects any vector that
/// is not exactly [`EMBEDDING_DIM`] finite values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding([f32; EMBEDDING_DIM]);

impl Embedding {
    pub fn new(values: [f32; EMBEDDING_DIM]) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean distance. For unit-normalized embeddings the result lies in [0, 2].
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Scale to unit length. A zero vector is returned unchanged.
    pub fn normalized(mut self) -> Self {
        let norm = self.0.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in self.0.iter_mut() {
                *v /= norm;
            }
        }
        self
    }

    /// Encode for storage as a JSON array.
    pub fn to_json(&self) -> String {
        let values: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        format!("[{}]", values.join(","))
    }

    /// Decode a stored JSON array, validating length and finiteness.
    pub fn from_json(raw: &str) -> Result<Self, EmbeddingError> {
        let values: Vec<f32> =
            serde_json::from_str(raw).map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
        Self::try_from(values)
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = EmbeddingError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::try_from(values.as_slice())
    }
}

impl TryFrom<&[f32]> for Embedding {
    type Error = EmbeddingError;

    fn try_from(values: &[f32]) -> Result<Self, Self::Error> {
        if values.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::Dimension(values.len()));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite(idx));
        }
        let mut out = [0.0f32; EMBEDDING_DIM];
        out.copy_from_slice(values);
        Ok(Self(out))
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.0.to_vec()
    }
}

/// Face location in pixel coordinates, ordered the way callers draw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceBox {
    /// Multiply every coordinate by `factor` (detection runs on a downscaled frame).
    pub fn scaled(self, factor: u32) -> Self {
        let f = factor as i32;
        Self {
            top: self.top * f,
            right: self.right * f,
            bottom: self.bottom * f,
            left: self.left * f,
        }
    }

    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }
}

/// One face found in a frame, with its embedding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub embedding: Embedding,
    pub location: FaceBox,
}

/// A registered student's embedding, as held by the roster cache.
#[derive(Debug, Clone)]
pub struct KnownFace {
    pub student_id: i64,
    pub name: String,
    pub embedding: Embedding,
}

/// A face in a frame that matched a known student.
#[derive(Debug, Clone, Serialize)]
pub struct Recognition {
    pub student_id: i64,
    pub name: String,
    /// `1 - distance`, clamped into [0, 1].
    pub confidence: f32,
    pub location: FaceBox,
}
