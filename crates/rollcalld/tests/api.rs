//! Integration tests for the attendance HTTP API

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use futures::StreamExt;
use rollcall_core::{
    DetectedFace, Embedding, FaceBox, FaceMatcher, FrameRecognizer, MatcherError, EMBEDDING_DIM,
};
use rollcall_hw::{CameraError, Frame, FrameSource};
use rollcalld::{create_router, seed, spawn_engine, AppState, CameraOpener, Storage};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt; // for `oneshot`

/// Faces the fake matcher reports for every image; tests swap them between calls.
#[derive(Clone, Default)]
struct Faces(Arc<Mutex<Vec<DetectedFace>>>);

impl Faces {
    fn set(&self, faces: Vec<DetectedFace>) {
        *self.0.lock().unwrap() = faces;
    }
}

struct FakeMatcher(Faces);

impl FaceMatcher for FakeMatcher {
    fn detect_and_encode(
        &mut self,
        _rgb: &[u8],
        _width: u32,
        _height: u32,
    ) -> Result<Vec<DetectedFace>, MatcherError> {
        Ok(self.0 .0.lock().unwrap().clone())
    }
}

struct GreySource(u32);

impl FrameSource for GreySource {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.0 += 1;
        Frame::from_rgb(vec![128; 64 * 48 * 3], 64, 48, self.0)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }
}

struct FakeOpener {
    available: bool,
}

impl CameraOpener for FakeOpener {
    fn open(&mut self) -> Result<Box<dyn FrameSource>, CameraError> {
        if self.available {
            Ok(Box::new(GreySource(0)))
        } else {
            Err(CameraError::DeviceNotFound("/dev/video0".into()))
        }
    }
}

struct TestApp {
    app: Router,
    faces: Faces,
    uploads: tempfile::TempDir,
}

/// Helper to create a seeded app backed by in-memory SQLite and fake hardware
async fn create_test_app(camera_available: bool) -> TestApp {
    let uploads = tempfile::tempdir().unwrap();
    let store = Storage::open_in_memory().await.unwrap();
    seed::seed_sample_data(&store).await.unwrap();

    let faces = Faces::default();
    let engine = spawn_engine(
        Box::new(FakeMatcher(faces.clone())),
        Box::new(FakeOpener {
            available: camera_available,
        }),
        FrameRecognizer::new(0.6, 1),
        75,
    )
    .unwrap();

    let state = Arc::new(AppState::new(
        store,
        engine,
        uploads.path().to_path_buf(),
        Duration::from_secs(10),
        128,
    ));
    state.roster.reload(&state.store).await.unwrap();

    TestApp {
        app: create_router(state, 1024 * 1024),
        faces,
        uploads,
    }
}

fn face_at(first: f32) -> DetectedFace {
    let mut values = [0.0f32; EMBEDDING_DIM];
    values[0] = first;
    DetectedFace {
        embedding: Embedding::new(values),
        location: FaceBox {
            top: 8,
            right: 40,
            bottom: 40,
            left: 8,
        },
    }
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(16, 16, image::Rgb([200, 180, 160]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn photo_request(student_db_id: i64, bytes: &[u8]) -> Request<Body> {
    let boundary = "rollcall-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"alice.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(format!("/api/students/{student_db_id}/face"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, value: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let t = create_test_app(true).await;
    let (status, json) = send(&t.app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "rollcalld");
    assert_eq!(json["camera_running"], false);
    assert_eq!(json["current_session"], Value::Null);
}

#[tokio::test]
async fn test_seeded_listing() {
    let t = create_test_app(true).await;

    let (status, json) = send(&t.app, get("/api/students")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 3);
    assert_eq!(json["students"][0]["student_id"], "S001");
    assert_eq!(json["students"][0]["has_face"], false);

    let (_, teachers) = send(&t.app, get("/api/teachers")).await;
    assert_eq!(teachers[0]["teacher_id"], "T001");

    let (status, classes) = send(&t.app, get("/api/teachers/1/classes")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(classes["classes"][0]["class_code"], "CS101");

    let (status, _) = send(&t.app, get("/api/teachers/99/classes")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_student_and_duplicate() {
    let t = create_test_app(true).await;
    let payload = json!({
        "student_id": "S004",
        "name": "Dan Brooks",
        "email": "dan@student.edu"
    });

    let (status, json) = send(&t.app, post_json("/api/students", payload.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["student_id"], "S004");

    let (status, json) = send(&t.app, post_json("/api/students", payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("S004"));

    let (status, _) = send(
        &t.app,
        post_json("/api/students", json!({"student_id": " ", "name": "x", "email": "y"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_face_outcomes() {
    let t = create_test_app(true).await;
    let png = png_bytes();

    t.faces.set(vec![]);
    let (status, json) = send(&t.app, photo_request(1, &png)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("no face"));

    t.faces.set(vec![face_at(0.0), face_at(1.0)]);
    let (status, _) = send(&t.app, photo_request(1, &png)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&t.app, photo_request(1, b"definitely not an image")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    t.faces.set(vec![face_at(0.0)]);
    let (status, _) = send(&t.app, photo_request(99, &png)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = send(&t.app, photo_request(1, &png)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["has_face"], true);
    let saved = std::path::Path::new(json["photo_path"].as_str().unwrap());
    let saved_name = saved.file_name().unwrap().to_str().unwrap();
    assert!(saved_name.starts_with("student_S001_"));
    assert!(saved_name.ends_with("_alice.png"));
    assert!(saved.exists());

    let (_, health) = send(&t.app, get("/health")).await;
    assert_eq!(health["registered_faces"], 1);
}

fn stored_photo(listing: &Value, student_id: &str) -> Option<String> {
    listing["students"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["student_id"] == student_id)
        .and_then(|s| s["photo_path"].as_str())
        .map(str::to_string)
}

#[tokio::test]
async fn test_rejected_upload_keeps_saved_photo() {
    let t = create_test_app(true).await;
    let png = png_bytes();

    t.faces.set(vec![face_at(0.0)]);
    let (status, json) = send(&t.app, photo_request(1, &png)).await;
    assert_eq!(status, StatusCode::OK);
    let saved = json["photo_path"].as_str().unwrap().to_string();

    // Same file name again, this time without a face.
    t.faces.set(vec![]);
    let (status, _) = send(&t.app, photo_request(1, &png)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, listing) = send(&t.app, get("/api/students")).await;
    assert_eq!(stored_photo(&listing, "S001"), Some(saved.clone()));
    assert!(std::path::Path::new(&saved).exists());
    assert_eq!(
        std::fs::read_dir(t.uploads.path()).unwrap().count(),
        1,
        "rejected upload left a file behind"
    );
}

#[tokio::test]
async fn test_reregistration_replaces_photo() {
    let t = create_test_app(true).await;
    let png = png_bytes();
    t.faces.set(vec![face_at(0.0)]);

    let (_, first) = send(&t.app, photo_request(1, &png)).await;
    let first = first["photo_path"].as_str().unwrap().to_string();
    let (status, second) = send(&t.app, photo_request(1, &png)).await;
    assert_eq!(status, StatusCode::OK);
    let second = second["photo_path"].as_str().unwrap().to_string();

    assert_ne!(first, second);
    assert!(!std::path::Path::new(&first).exists());
    assert!(std::path::Path::new(&second).exists());
}

#[tokio::test]
async fn test_live_feed_marks_once_per_session() {
    let t = create_test_app(true).await;

    // Register S001 with the reference embedding.
    t.faces.set(vec![face_at(0.0)]);
    let (status, _) = send(&t.app, photo_request(1, &png_bytes())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, session) = send(&t.app, post("/api/classes/1/sessions")).await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = session["id"].as_i64().unwrap();
    assert_eq!(session["is_active"], true);

    let (_, current) = send(&t.app, get("/api/sessions/current")).await;
    assert_eq!(current["session"]["id"], session_id);

    // Camera frames now show S001 at distance 0.3.
    t.faces.set(vec![face_at(0.3)]);
    let (status, _) = send(&t.app, post("/api/camera/start")).await;
    assert_eq!(status, StatusCode::OK);

    let response = t.app.clone().oneshot(get("/video_feed")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );
    let mut parts = response.into_body().into_data_stream();
    for _ in 0..3 {
        let part = parts.next().await.unwrap().unwrap();
        assert!(part.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
    }
    drop(parts);

    let (status, report) = send(&t.app, get(&format!("/api/sessions/{session_id}/report"))).await;
    assert_eq!(status, StatusCode::OK);
    let rows = report["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["student"]["student_id"], "S001");
    assert_eq!(rows[0]["status"], "present");
    let confidence = rows[0]["attendance"]["confidence"].as_f64().unwrap();
    assert!((confidence - 0.7).abs() < 1e-4);
    assert_eq!(rows[1]["status"], "absent");
    assert_eq!(rows[2]["status"], "absent");

    let (_, history) = send(&t.app, get("/api/students/S001/attendance")).await;
    assert_eq!(history["history"].as_array().unwrap().len(), 1);
    assert_eq!(history["history"][0]["class_code"], "CS101");

    let (_, stats) = send(&t.app, get("/api/controller/reports")).await;
    assert_eq!(stats["classes"][0]["total_sessions"], 1);
    assert_eq!(stats["classes"][0]["total_attendances"], 1);
}

#[tokio::test]
async fn test_recognized_does_not_mark() {
    let t = create_test_app(true).await;
    t.faces.set(vec![face_at(0.0)]);
    send(&t.app, photo_request(1, &png_bytes())).await;

    let (_, json) = send(&t.app, get("/api/recognized")).await;
    assert_eq!(json["students"], json!([]));

    let (_, session) = send(&t.app, post("/api/classes/1/sessions")).await;
    let session_id = session["id"].as_i64().unwrap();
    send(&t.app, post("/api/camera/start")).await;

    let (status, json) = send(&t.app, get("/api/recognized")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["students"][0]["name"], "Alice Johnson");
    assert_eq!(json["students"][0]["confidence"], 1.0);

    let (_, report) = send(&t.app, get(&format!("/api/sessions/{session_id}/report"))).await;
    assert_eq!(report["rows"][0]["status"], "absent");

    let (status, json) = send(&t.app, post("/api/camera/stop")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "Camera stopped");
    let (_, json) = send(&t.app, get("/api/recognized")).await;
    assert_eq!(json["students"], json!([]));
}

#[tokio::test]
async fn test_session_lifecycle_errors() {
    let t = create_test_app(true).await;

    let (status, _) = send(&t.app, post("/api/classes/42/sessions")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, session) = send(&t.app, post("/api/classes/1/sessions")).await;
    let id = session["id"].as_i64().unwrap();

    let (status, ended) = send(&t.app, post(&format!("/api/sessions/{id}/end"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["is_active"], false);
    assert!(ended["end_time"].is_string());

    let (status, _) = send(&t.app, post(&format!("/api/sessions/{id}/end"))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, current) = send(&t.app, get("/api/sessions/current")).await;
    assert_eq!(current["session"], Value::Null);

    let (status, _) = send(&t.app, get("/api/sessions/999/report")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_enrollment_conflict() {
    let t = create_test_app(true).await;
    send(
        &t.app,
        post_json(
            "/api/students",
            json!({"student_id": "S004", "name": "Dan Brooks", "email": "dan@student.edu"}),
        ),
    )
    .await;

    let (status, _) = send(
        &t.app,
        post_json("/api/classes/1/enrollments", json!({"student_id": "S004"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &t.app,
        post_json("/api/classes/1/enrollments", json!({"student_id": "S004"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &t.app,
        post_json("/api/classes/1/enrollments", json!({"student_id": "S404"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_camera_unavailable() {
    let t = create_test_app(false).await;
    let (status, json) = send(&t.app, post("/api/camera/start")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["error"].as_str().unwrap().contains("camera"));

    // With no camera the live feed ends immediately.
    let response = t.app.clone().oneshot(get("/video_feed")).await.unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_dashboard_counts() {
    let t = create_test_app(true).await;
    send(&t.app, post("/api/classes/1/sessions")).await;

    let (status, json) = send(&t.app, get("/api/controller/dashboard")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_students"], 3);
    assert_eq!(json["total_classes"], 1);
    assert_eq!(json["total_sessions"], 1);
    assert_eq!(
        json["recent_sessions"][0]["class_name"],
        "Introduction to Programming"
    );
}
