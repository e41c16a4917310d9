//! Rollcall attendance daemon
//!
//! Marks classroom attendance from a live camera feed. Students register a
//! face photo once; while a session is running, every face recognized in the
//! feed is recorded as present, at most once per session.

pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod live;
pub mod models;
pub mod overlay;
pub mod recorder;
pub mod roster;
pub mod seed;
pub mod sessions;
pub mod store;
pub mod suppression;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use engine::{spawn_engine, CameraOpener, EngineHandle, V4lOpener};
pub use error::AttendanceError;
pub use handlers::AppState;
pub use store::Storage;

/// Create the application router. `body_limit` caps upload size.
pub fn create_router(shared_state: Arc<AppState>, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route(
            "/api/students",
            get(handlers::list_students_handler).post(handlers::create_student_handler),
        )
        .route(
            "/api/students/{id}/face",
            post(handlers::register_face_handler),
        )
        .route(
            "/api/students/{student_id}/attendance",
            get(handlers::student_attendance_handler),
        )
        .route("/api/teachers", get(handlers::list_teachers_handler))
        .route(
            "/api/teachers/{id}/classes",
            get(handlers::teacher_classes_handler),
        )
        .route(
            "/api/classes/{id}/enrollments",
            post(handlers::enroll_handler),
        )
        .route(
            "/api/classes/{id}/sessions",
            post(handlers::start_session_handler),
        )
        .route(
            "/api/sessions/current",
            get(handlers::current_session_handler),
        )
        .route(
            "/api/sessions/{id}/end",
            post(handlers::end_session_handler),
        )
        .route(
            "/api/sessions/{id}/report",
            get(handlers::session_report_handler),
        )
        .route(
            "/api/controller/dashboard",
            get(handlers::dashboard_handler),
        )
        .route(
            "/api/controller/reports",
            get(handlers::class_reports_handler),
        )
        .route("/api/camera/start", post(handlers::start_camera_handler))
        .route("/api/camera/stop", post(handlers::stop_camera_handler))
        .route("/api/recognized", get(handlers::recognized_handler))
        .route("/video_feed", get(live::video_feed_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Periodically drop expired suppression entries until the state is dropped.
pub fn spawn_sweeper(state: &Arc<AppState>, every: Duration) -> tokio::task::JoinHandle<()> {
    let state = Arc::downgrade(state);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let Some(state) = state.upgrade() else {
                break;
            };
            state.recorder.sweep().await;
        }
    })
}
