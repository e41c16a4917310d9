use crate::engine::EngineError;
use rollcall_core::EmbeddingError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("no face found in the image")]
    NoFaceDetected,
    #[error("{0} faces found; use an image with exactly one face")]
    AmbiguousFace(usize),
    #[error("student not found: {0}")]
    StudentNotFound(String),
    #[error("class not found: {0}")]
    ClassNotFound(i64),
    #[error("attendance session not found: {0}")]
    SessionNotFound(i64),
    #[error("attendance session {0} has already ended")]
    SessionEnded(i64),
    #[error("identifier already registered: {0}")]
    DuplicateIdentifier(String),
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("conflicting write: {0}")]
    PersistenceConflict(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("stored embedding for student {student_id} is invalid: {source}")]
    CorruptEmbedding {
        student_id: i64,
        source: EmbeddingError,
    },
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for AttendanceError {
    fn from(err: rusqlite::Error) -> Self {
        AttendanceError::Database(err.into())
    }
}

impl From<EngineError> for AttendanceError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Camera(e) => AttendanceError::CameraUnavailable(e.to_string()),
            EngineError::Matcher(e) => AttendanceError::InvalidImage(e.to_string()),
            other => AttendanceError::CameraUnavailable(other.to_string()),
        }
    }
}

/// True when a SQLite error is a UNIQUE/constraint violation.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
