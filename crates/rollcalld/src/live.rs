//! MJPEG live feed that marks attendance as it streams.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use futures::stream;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::CapturedFrame;
use crate::handlers::AppState;

pub const BOUNDARY: &str = "frame";

/// Stream annotated frames as `multipart/x-mixed-replace`.
///
/// Ends when the camera is stopped or a read fails. Marking errors are logged
/// and the stream keeps going.
pub async fn video_feed_handler(State(state): State<Arc<AppState>>) -> Response {
    let frames = stream::unfold(state, |state| async move {
        let roster = state.roster.snapshot();
        match state.engine.capture(roster, true).await {
            Ok(Some(frame)) => {
                let part = process_frame(&state, frame).await;
                Some((Ok::<_, std::io::Error>(part), state))
            }
            Ok(None) => {
                info!("camera stopped; ending live feed");
                None
            }
            Err(e) => {
                warn!(error = %e, "camera unavailable; ending live feed");
                None
            }
        }
    });

    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )],
        Body::from_stream(frames),
    )
        .into_response()
}

/// Mark the frame's recognitions in the current session and wrap its JPEG as one part.
async fn process_frame(state: &AppState, frame: CapturedFrame) -> Bytes {
    if !frame.recognized.is_empty() {
        if let Some(session_id) = state.sessions.current().await {
            match state.recorder.mark(session_id, &frame.recognized).await {
                Ok(marked) if !marked.is_empty() => {
                    debug!(session_id, marked = marked.len(), "frame marked attendance")
                }
                Ok(_) => {}
                Err(e) => warn!(session_id, error = %e, "failed to mark attendance"),
            }
        }
    }

    let jpeg = frame.jpeg.unwrap_or_default();
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n").as_bytes());
    part.extend_from_slice(&jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}
