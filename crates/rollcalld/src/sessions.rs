//! Tracks which attendance session the live feed is currently marking.

use crate::error::AttendanceError;
use crate::models::AttendanceSession;
use crate::store::Storage;
use chrono::{Local, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct SessionManager {
    store: Storage,
    current: Mutex<Option<i64>>,
}

impl SessionManager {
    pub fn new(store: Storage) -> Self {
        Self {
            store,
            current: Mutex::new(None),
        }
    }

    /// Open a session for `class_id` and make it the current one.
    ///
    /// A session that was already current stays active in the database; only
    /// the pointer moves. The session date is the local calendar day; the
    /// start time is stored in UTC.
    pub async fn start(&self, class_id: i64) -> Result<AttendanceSession, AttendanceError> {
        let mut current = self.current.lock().await;
        let now = Utc::now();
        let session = self
            .store
            .create_session(class_id, now.with_timezone(&Local).date_naive(), now)
            .await?;

        if let Some(previous) = current.replace(session.id) {
            warn!(
                previous,
                replacement = session.id,
                "current session replaced without being ended"
            );
        }
        info!(session_id = session.id, class_id, "attendance session started");
        Ok(session)
    }

    /// End a session. Clears the current pointer when it refers to `session_id`.
    pub async fn end(&self, session_id: i64) -> Result<AttendanceSession, AttendanceError> {
        let mut current = self.current.lock().await;
        let session = self.store.end_session(session_id, Utc::now()).await?;
        if *current == Some(session_id) {
            *current = None;
        }
        info!(session_id, "attendance session ended");
        Ok(session)
    }

    /// Id of the session the live feed marks into, if any.
    pub async fn current(&self) -> Option<i64> {
        *self.current.lock().await
    }

    /// The current session with its stored state.
    pub async fn current_session(&self) -> Result<Option<AttendanceSession>, AttendanceError> {
        match self.current().await {
            Some(id) => self.store.get_session(id).await,
            None => Ok(None),
        }
    }
}
