//! rollcall-core: Face embeddings, matching, and per-frame recognition.
//!
//! The `FaceMatcher` trait is the boundary to the face model. The bundled
//! implementation runs SCRFD detection and a 128-dimensional encoder on
//! ONNX Runtime; everything above it only sees embeddings and boxes.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod matcher;
pub mod types;

pub use matcher::{
    best_match, confidence_from_distance, FaceMatcher, FrameRecognizer, MatcherError,
    OnnxFaceMatcher, DEFAULT_DOWNSCALE, DEFAULT_TOLERANCE,
};
pub use types::{
    DetectedFace, Embedding, EmbeddingError, FaceBox, KnownFace, Recognition, EMBEDDING_DIM,
};
