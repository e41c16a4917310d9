//! Turns per-frame recognitions into attendance rows.

use crate::error::AttendanceError;
use crate::models::AttendanceRecord;
use crate::store::{MarkOutcome, Storage};
use crate::suppression::{SuppressionBuffer, SuppressionKey};
use chrono::Utc;
use rollcall_core::Recognition;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct AttendanceRecorder {
    store: Storage,
    buffer: Mutex<SuppressionBuffer>,
}

impl AttendanceRecorder {
    pub fn new(store: Storage, cooldown: Duration, capacity: usize) -> Self {
        Self {
            store,
            buffer: Mutex::new(SuppressionBuffer::new(cooldown, capacity)),
        }
    }

    /// Mark every recognized student in `session_id`, returning only the new rows.
    ///
    /// Students attempted within the cooldown are skipped without touching the
    /// database. Students that already have a row are counted as attempted so
    /// the following frames skip them too. A failed write leaves the buffer
    /// untouched.
    pub async fn mark(
        &self,
        session_id: i64,
        recognitions: &[Recognition],
    ) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let mut buffer = self.buffer.lock().await;
        let now = Instant::now();

        let mut seen = HashSet::new();
        let candidates: Vec<(i64, f32)> = recognitions
            .iter()
            .filter(|r| seen.insert(r.student_id))
            .filter(|r| buffer.should_mark(SuppressionKey::new(session_id, r.student_id), now))
            .map(|r| (r.student_id, r.confidence))
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let outcomes = self
            .store
            .record_attendance(session_id, candidates, Utc::now())
            .await?;

        let mut marked = Vec::new();
        for outcome in outcomes {
            match outcome {
                MarkOutcome::Marked(record) => {
                    buffer.record(SuppressionKey::new(session_id, record.student_id), now);
                    info!(
                        session_id,
                        student_id = record.student_id,
                        confidence = record.confidence,
                        "attendance marked"
                    );
                    marked.push(record);
                }
                MarkOutcome::AlreadyMarked { student_id } => {
                    buffer.record(SuppressionKey::new(session_id, student_id), now);
                    debug!(session_id, student_id, "already marked");
                }
            }
        }
        Ok(marked)
    }

    /// Expire stale suppression entries.
    pub async fn sweep(&self) {
        let mut buffer = self.buffer.lock().await;
        buffer.sweep(Instant::now());
    }

    /// Drop the cooldown entries of a session that has ended.
    pub async fn forget_session(&self, session_id: i64) {
        self.buffer.lock().await.forget_session(session_id);
    }

    #[cfg(test)]
    pub(crate) async fn suppressed(&self) -> usize {
        self.buffer.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewStudent;
    use rollcall_core::FaceBox;

    struct Fixture {
        recorder: AttendanceRecorder,
        store: Storage,
        session_id: i64,
        alice: i64,
        bob: i64,
    }

    async fn fixture(cooldown: Duration) -> Fixture {
        let store = Storage::open_in_memory().await.unwrap();
        let teacher = store
            .insert_teacher("T001", "Dr. John Smith", "john.smith@university.edu", "Computer Science")
            .await
            .unwrap();
        let class = store
            .insert_class("CS101", "Introduction to Programming", "Computer Science", teacher.id, "MWF 10:00-11:00", "Room 101")
            .await
            .unwrap();
        let mut ids = Vec::new();
        for (sid, name) in [("S001", "Alice Johnson"), ("S002", "Bob Wilson")] {
            let s = store
                .insert_student(NewStudent {
                    student_id: sid.into(),
                    name: name.into(),
                    email: format!("{sid}@student.edu"),
                })
                .await
                .unwrap();
            ids.push(s.id);
        }
        let now = Utc::now();
        let session = store.create_session(class.id, now.date_naive(), now).await.unwrap();
        Fixture {
            recorder: AttendanceRecorder::new(store.clone(), cooldown, 64),
            store,
            session_id: session.id,
            alice: ids[0],
            bob: ids[1],
        }
    }

    fn seen(student_id: i64, confidence: f32) -> Recognition {
        Recognition {
            student_id,
            name: format!("student {student_id}"),
            confidence,
            location: FaceBox {
                top: 0,
                right: 10,
                bottom: 10,
                left: 0,
            },
        }
    }

    #[tokio::test]
    async fn test_marks_once_and_suppresses_next_frame() {
        let f = fixture(Duration::from_secs(10)).await;

        let marked = f.recorder.mark(f.session_id, &[seen(f.alice, 0.7)]).await.unwrap();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].student_id, f.alice);
        assert!((marked[0].confidence.unwrap() - 0.7).abs() < 1e-6);

        let again = f.recorder.mark(f.session_id, &[seen(f.alice, 0.7)]).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(f.store.attendance_for_session(f.session_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_already_marked_after_cooldown_is_not_new() {
        let f = fixture(Duration::ZERO).await;

        assert_eq!(f.recorder.mark(f.session_id, &[seen(f.alice, 0.9)]).await.unwrap().len(), 1);
        // Cooldown elapsed: the store reports the existing row and nothing new is returned.
        assert!(f.recorder.mark(f.session_id, &[seen(f.alice, 0.95)]).await.unwrap().is_empty());

        let rows = f.store.attendance_for_session(f.session_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].confidence.unwrap() - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_duplicate_faces_in_one_frame() {
        let f = fixture(Duration::from_secs(10)).await;
        let marked = f
            .recorder
            .mark(f.session_id, &[seen(f.alice, 0.8), seen(f.bob, 0.6), seen(f.alice, 0.5)])
            .await
            .unwrap();
        assert_eq!(marked.len(), 2);
        assert_eq!(f.recorder.suppressed().await, 2);
    }

    #[tokio::test]
    async fn test_failed_write_does_not_suppress() {
        let f = fixture(Duration::from_secs(10)).await;
        f.store.end_session(f.session_id, Utc::now()).await.unwrap();

        assert!(matches!(
            f.recorder.mark(f.session_id, &[seen(f.alice, 0.8)]).await,
            Err(AttendanceError::SessionEnded(_))
        ));
        assert_eq!(f.recorder.suppressed().await, 0);
    }

    #[tokio::test]
    async fn test_forget_session_drops_only_that_session() {
        let f = fixture(Duration::from_secs(10)).await;
        f.recorder.mark(f.session_id, &[seen(f.alice, 0.8), seen(f.bob, 0.6)]).await.unwrap();
        assert_eq!(f.recorder.suppressed().await, 2);

        f.recorder.forget_session(f.session_id + 1).await;
        assert_eq!(f.recorder.suppressed().await, 2);
        f.recorder.forget_session(f.session_id).await;
        assert_eq!(f.recorder.suppressed().await, 0);
    }

    #[tokio::test]
    async fn test_empty_frame_is_noop() {
        let f = fixture(Duration::from_secs(10)).await;
        assert!(f.recorder.mark(f.session_id, &[]).await.unwrap().is_empty());
        // No candidates means the store is never consulted, even for a bogus session.
        assert!(f.recorder.mark(9999, &[]).await.unwrap().is_empty());
    }
}
