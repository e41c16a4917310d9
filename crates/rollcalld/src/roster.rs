//! In-memory copy of every registered face, shared with the live feed.

use crate::engine::EngineHandle;
use crate::error::AttendanceError;
use crate::models::Student;
use crate::store::Storage;
use image::RgbImage;
use rollcall_core::KnownFace;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::info;

/// Snapshot-able roster. Readers get an `Arc` and never block a reload.
pub struct RosterCache {
    faces: RwLock<Arc<Vec<KnownFace>>>,
    /// Held across every store write and read-and-replace so a stale reload
    /// never overwrites a newer one.
    writer: Mutex<()>,
}

impl Default for RosterCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RosterCache {
    pub fn new() -> Self {
        Self {
            faces: RwLock::new(Arc::new(Vec::new())),
            writer: Mutex::new(()),
        }
    }

    /// Replace the cached roster with the store's current contents.
    pub async fn reload(&self, store: &Storage) -> Result<usize, AttendanceError> {
        let _writer = self.writer.lock().await;
        self.load(store).await
    }

    async fn load(&self, store: &Storage) -> Result<usize, AttendanceError> {
        let faces = store.known_faces().await?;
        let count = faces.len();
        self.replace(faces);
        info!(faces = count, "roster loaded");
        Ok(count)
    }

    /// The roster as of now. Later reloads do not affect the returned value.
    pub fn snapshot(&self) -> Arc<Vec<KnownFace>> {
        match self.faces.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn replace(&self, faces: Vec<KnownFace>) {
        let faces = Arc::new(faces);
        match self.faces.write() {
            Ok(mut guard) => *guard = faces,
            Err(poisoned) => *poisoned.into_inner() = faces,
        }
    }

    /// Register a student's face from a photo.
    ///
    /// The photo must contain exactly one face. On any failure the stored
    /// embedding and the cache are left as they were.
    pub async fn register(
        &self,
        store: &Storage,
        engine: &EngineHandle,
        student_id: i64,
        photo_path: &str,
        image: RgbImage,
    ) -> Result<Student, AttendanceError> {
        if store.get_student(student_id).await?.is_none() {
            return Err(AttendanceError::StudentNotFound(student_id.to_string()));
        }

        let embeddings = engine.encode(image).await?;
        let embedding = match embeddings.as_slice() {
            [] => return Err(AttendanceError::NoFaceDetected),
            [one] => *one,
            many => return Err(AttendanceError::AmbiguousFace(many.len())),
        };

        {
            let _writer = self.writer.lock().await;
            store.set_face(student_id, &embedding, photo_path).await?;
            self.load(store).await?;
        }
        info!(student_id, photo = photo_path, "face registered");

        store
            .get_student(student_id)
            .await?
            .ok_or_else(|| AttendanceError::StudentNotFound(student_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{embedding, face, spawn_fake};
    use crate::models::NewStudent;

    async fn store_with_student() -> (Storage, i64) {
        let store = Storage::open_in_memory().await.unwrap();
        let s = store
            .insert_student(NewStudent {
                student_id: "S001".into(),
                name: "Alice Johnson".into(),
                email: "alice@student.edu".into(),
            })
            .await
            .unwrap();
        (store, s.id)
    }

    #[tokio::test]
    async fn test_register_single_face() {
        let (store, id) = store_with_student().await;
        let (engine, _) = spawn_fake(vec![face(0.3)], false);
        let roster = RosterCache::new();

        let student = roster
            .register(&store, &engine, id, "uploads/student_S001_a.jpg", RgbImage::new(8, 8))
            .await
            .unwrap();
        assert!(student.has_face);

        let snapshot = roster.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].student_id, id);
        assert_eq!(snapshot[0].name, "Alice Johnson");
        assert_eq!(store.stored_embedding(id).await.unwrap(), Some(embedding(0.3)));
    }

    #[tokio::test]
    async fn test_register_no_face_leaves_state() {
        let (store, id) = store_with_student().await;
        let (engine, _) = spawn_fake(vec![], false);
        let roster = RosterCache::new();

        assert!(matches!(
            roster.register(&store, &engine, id, "p.jpg", RgbImage::new(8, 8)).await,
            Err(AttendanceError::NoFaceDetected)
        ));
        assert!(roster.is_empty());
        assert_eq!(store.stored_embedding(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_register_two_faces_is_ambiguous() {
        let (store, id) = store_with_student().await;
        let (engine, _) = spawn_fake(vec![face(0.1), face(0.2)], false);
        let roster = RosterCache::new();

        assert!(matches!(
            roster.register(&store, &engine, id, "p.jpg", RgbImage::new(8, 8)).await,
            Err(AttendanceError::AmbiguousFace(2))
        ));
        assert_eq!(store.stored_embedding(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_register_unknown_student() {
        let (store, _) = store_with_student().await;
        let (engine, _) = spawn_fake(vec![face(0.1)], false);
        let roster = RosterCache::new();

        assert!(matches!(
            roster.register(&store, &engine, 999, "p.jpg", RgbImage::new(8, 8)).await,
            Err(AttendanceError::StudentNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registrations_all_cached() {
        let store = Storage::open_in_memory().await.unwrap();
        let mut ids = Vec::new();
        for n in 1..=8 {
            let s = store
                .insert_student(NewStudent {
                    student_id: format!("S{n:03}"),
                    name: format!("Student {n}"),
                    email: format!("s{n}@student.edu"),
                })
                .await
                .unwrap();
            ids.push(s.id);
        }
        let (engine, _) = spawn_fake(vec![face(0.3)], false);
        let roster = Arc::new(RosterCache::new());

        let mut tasks = Vec::new();
        for id in ids.clone() {
            let (roster, store, engine) = (roster.clone(), store.clone(), engine.clone());
            tasks.push(tokio::spawn(async move {
                roster
                    .register(&store, &engine, id, "p.jpg", RgbImage::new(8, 8))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut cached: Vec<i64> = roster.snapshot().iter().map(|f| f.student_id).collect();
        cached.sort_unstable();
        assert_eq!(cached, ids);
    }

    #[tokio::test]
    async fn test_snapshot_unaffected_by_reload() {
        let (store, id) = store_with_student().await;
        let roster = RosterCache::new();
        let before = roster.snapshot();

        store.set_face(id, &embedding(0.5), "p.jpg").await.unwrap();
        assert_eq!(roster.reload(&store).await.unwrap(), 1);

        assert!(before.is_empty());
        assert_eq!(roster.len(), 1);
    }
}
