//! API request handlers for the attendance daemon

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rollcall_core::Recognition;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    engine::{EngineError, EngineHandle},
    error::AttendanceError,
    models::{
        AttendanceHistoryEntry, AttendanceSession, Class, ClassStats, DashboardStats, Enrollment,
        NewStudent, SessionReport, Student, Teacher,
    },
    recorder::AttendanceRecorder,
    roster::RosterCache,
    sessions::SessionManager,
    store::Storage,
};

/// Shared application state
pub struct AppState {
    pub store: Storage,
    pub sessions: SessionManager,
    pub recorder: AttendanceRecorder,
    pub roster: RosterCache,
    pub engine: EngineHandle,
    pub upload_dir: PathBuf,
}

impl AppState {
    pub fn new(
        store: Storage,
        engine: EngineHandle,
        upload_dir: PathBuf,
        cooldown: Duration,
        suppression_capacity: usize,
    ) -> Self {
        Self {
            sessions: SessionManager::new(store.clone()),
            recorder: AttendanceRecorder::new(store.clone(), cooldown, suppression_capacity),
            roster: RosterCache::new(),
            store,
            engine,
            upload_dir,
        }
    }
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<AttendanceError> for ApiError {
    fn from(err: AttendanceError) -> Self {
        let status = match &err {
            AttendanceError::StudentNotFound(_)
            | AttendanceError::ClassNotFound(_)
            | AttendanceError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AttendanceError::DuplicateIdentifier(_)
            | AttendanceError::PersistenceConflict(_)
            | AttendanceError::SessionEnded(_) => StatusCode::CONFLICT,
            AttendanceError::NoFaceDetected
            | AttendanceError::AmbiguousFace(_)
            | AttendanceError::InvalidImage(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AttendanceError::CameraUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AttendanceError::CorruptEmbedding { .. }
            | AttendanceError::Database(_)
            | AttendanceError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %err, "request failed");
        }
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        AttendanceError::from(err).into()
    }
}

/// List of students
#[derive(Debug, Serialize)]
pub struct StudentsListResponse {
    pub students: Vec<Student>,
    pub total: usize,
}

/// A student's attendance history
#[derive(Debug, Serialize)]
pub struct StudentAttendanceResponse {
    pub student: Student,
    pub history: Vec<AttendanceHistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct TeacherClassesResponse {
    pub teacher_id: i64,
    pub classes: Vec<Class>,
}

/// Request to enroll a student, by external identifier
#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub student_id: String,
}

#[derive(Debug, Serialize)]
pub struct CurrentSessionResponse {
    pub session: Option<AttendanceSession>,
}

#[derive(Debug, Serialize)]
pub struct ClassReportsResponse {
    pub classes: Vec<ClassStats>,
}

#[derive(Debug, Serialize)]
pub struct CameraResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct RecognizedResponse {
    pub students: Vec<Recognition>,
}

/// Health check endpoint
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let camera_running = state.engine.camera_running().await.unwrap_or(false);
    Json(serde_json::json!({
        "status": "healthy",
        "service": "rollcalld",
        "camera_running": camera_running,
        "registered_faces": state.roster.len(),
        "current_session": state.sessions.current().await,
    }))
}

pub async fn list_students_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StudentsListResponse>, ApiError> {
    let students = state.store.list_students().await?;
    Ok(Json(StudentsListResponse {
        total: students.len(),
        students,
    }))
}

/// Register a new student
pub async fn create_student_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewStudent>,
) -> Result<(StatusCode, Json<Student>), ApiError> {
    let payload = NewStudent {
        student_id: payload.student_id.trim().to_string(),
        name: payload.name.trim().to_string(),
        email: payload.email.trim().to_string(),
    };
    if payload.student_id.is_empty() || payload.name.is_empty() || payload.email.is_empty() {
        return Err(ApiError::bad_request(
            "student_id, name and email are required",
        ));
    }

    info!(student_id = %payload.student_id, "registering student");
    let student = state.store.insert_student(payload).await?;
    Ok((StatusCode::CREATED, Json(student)))
}

/// Register a student's face from an uploaded photo (multipart field `photo`)
pub async fn register_face_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> Result<Json<Student>, ApiError> {
    let student = state
        .store
        .get_student(id)
        .await?
        .ok_or_else(|| AttendanceError::StudentNotFound(id.to_string()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("photo") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("photo.jpg").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read photo: {e}")))?;
        upload = Some((file_name, bytes));
        break;
    }
    let Some((file_name, bytes)) = upload else {
        return Err(ApiError::bad_request("missing multipart field 'photo'"));
    };
    if bytes.is_empty() {
        return Err(ApiError::bad_request("uploaded photo is empty"));
    }

    let image = image::load_from_memory(&bytes)
        .map_err(|e| AttendanceError::InvalidImage(e.to_string()))?
        .to_rgb8();

    // Each upload gets its own file so a rejected photo never touches the saved one.
    let staged = tempfile::Builder::new()
        .prefix(&format!("student_{}_", sanitize_file_name(&student.student_id)))
        .suffix(&format!("_{}", sanitize_file_name(&file_name)))
        .rand_bytes(8)
        .tempfile_in(&state.upload_dir)
        .map_err(AttendanceError::from)?;
    tokio::fs::write(staged.path(), &bytes)
        .await
        .map_err(AttendanceError::from)?;
    let (_, photo_path) = staged
        .keep()
        .map_err(|e| AttendanceError::from(e.error))?;

    let photo = photo_path.to_string_lossy().into_owned();
    match state
        .roster
        .register(&state.store, &state.engine, id, &photo, image)
        .await
    {
        Ok(registered) => {
            if let Some(previous) = student.photo_path.as_deref() {
                remove_replaced_photo(&state.upload_dir, previous).await;
            }
            Ok(Json(registered))
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&photo_path).await {
                warn!(path = %photo, error = %rm, "failed to remove rejected photo");
            }
            Err(e.into())
        }
    }
}

/// Delete a superseded registration photo, but only one stored under `upload_dir`.
async fn remove_replaced_photo(upload_dir: &std::path::Path, previous: &str) {
    let previous = std::path::Path::new(previous);
    if !previous.starts_with(upload_dir) {
        return;
    }
    if let Err(e) = tokio::fs::remove_file(previous).await {
        warn!(path = %previous.display(), error = %e, "failed to remove replaced photo");
    }
}

pub async fn student_attendance_handler(
    State(state): State<Arc<AppState>>,
    Path(student_id): Path<String>,
) -> Result<Json<StudentAttendanceResponse>, ApiError> {
    let student = state
        .store
        .find_student(&student_id)
        .await?
        .ok_or_else(|| AttendanceError::StudentNotFound(student_id.clone()))?;
    let history = state.store.attendance_history(&student_id).await?;
    Ok(Json(StudentAttendanceResponse { student, history }))
}

pub async fn list_teachers_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Teacher>>, ApiError> {
    Ok(Json(state.store.list_teachers().await?))
}

pub async fn teacher_classes_handler(
    State(state): State<Arc<AppState>>,
    Path(teacher_id): Path<i64>,
) -> Result<Json<TeacherClassesResponse>, ApiError> {
    if !state.store.teacher_exists(teacher_id).await? {
        return Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("teacher not found: {teacher_id}"),
        });
    }
    let classes = state.store.classes_for_teacher(teacher_id).await?;
    Ok(Json(TeacherClassesResponse {
        teacher_id,
        classes,
    }))
}

pub async fn enroll_handler(
    State(state): State<Arc<AppState>>,
    Path(class_id): Path<i64>,
    Json(payload): Json<EnrollRequest>,
) -> Result<(StatusCode, Json<Enrollment>), ApiError> {
    let student = state
        .store
        .find_student(&payload.student_id)
        .await?
        .ok_or_else(|| AttendanceError::StudentNotFound(payload.student_id.clone()))?;
    let enrollment = state.store.enroll(student.id, class_id).await?;
    info!(student_id = %student.student_id, class_id, "student enrolled");
    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// Start an attendance session for a class and make it current
pub async fn start_session_handler(
    State(state): State<Arc<AppState>>,
    Path(class_id): Path<i64>,
) -> Result<(StatusCode, Json<AttendanceSession>), ApiError> {
    let session = state.sessions.start(class_id).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn current_session_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CurrentSessionResponse>, ApiError> {
    let session = state.sessions.current_session().await?;
    Ok(Json(CurrentSessionResponse { session }))
}

pub async fn end_session_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> Result<Json<AttendanceSession>, ApiError> {
    let session = state.sessions.end(session_id).await?;
    state.recorder.forget_session(session_id).await;
    Ok(Json(session))
}

pub async fn session_report_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> Result<Json<SessionReport>, ApiError> {
    Ok(Json(state.store.session_report(session_id).await?))
}

pub async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DashboardStats>, ApiError> {
    Ok(Json(state.store.dashboard().await?))
}

pub async fn class_reports_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ClassReportsResponse>, ApiError> {
    let classes = state.store.class_stats().await?;
    Ok(Json(ClassReportsResponse { classes }))
}

pub async fn start_camera_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CameraResponse>, ApiError> {
    state.engine.start_camera().await?;
    Ok(Json(CameraResponse {
        status: "Camera started".into(),
    }))
}

pub async fn stop_camera_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CameraResponse>, ApiError> {
    state.engine.stop_camera().await?;
    Ok(Json(CameraResponse {
        status: "Camera stopped".into(),
    }))
}

/// Recognize faces in one frame without marking attendance
pub async fn recognized_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RecognizedResponse>, ApiError> {
    let frame = state.engine.capture(state.roster.snapshot(), false).await?;
    let students = frame.map(|f| f.recognized).unwrap_or_default();
    Ok(Json(RecognizedResponse { students }))
}

/// Keep a client-supplied file name to a safe single path component.
pub(crate) fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "photo".to_string()
    } else {
        cleaned
    }
}
