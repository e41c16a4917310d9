//! SQLite storage for students, classes, sessions and attendance.
//!
//! All statements run on the `tokio-rusqlite` connection thread. Calls whose
//! outcome can be a domain error return a nested result from the closure so
//! that not-found and conflict cases keep their own `AttendanceError` kind.

use crate::error::{is_constraint_violation, AttendanceError};
use crate::models::{
    AttendanceHistoryEntry, AttendanceRecord, AttendanceSession, AttendanceStatus, Class,
    ClassStats, DashboardStats, Enrollment, ExamController, NewStudent, RecentSession, ReportRow,
    SessionReport, Student, Teacher,
};
use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::{Embedding, KnownFace};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{info, warn};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS students (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id    TEXT NOT NULL UNIQUE,
    name          TEXT NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    face_encoding TEXT,
    photo_path    TEXT,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS teachers (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    teacher_id  TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL,
    email       TEXT NOT NULL UNIQUE,
    department  TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS classes (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    class_code     TEXT NOT NULL UNIQUE,
    name           TEXT NOT NULL,
    subject        TEXT NOT NULL,
    teacher_id     INTEGER NOT NULL REFERENCES teachers(id),
    schedule_time  TEXT NOT NULL,
    room           TEXT NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS enrollments (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id   INTEGER NOT NULL REFERENCES students(id),
    class_id     INTEGER NOT NULL REFERENCES classes(id),
    enrolled_at  TEXT NOT NULL,
    CONSTRAINT unique_enrollment UNIQUE (student_id, class_id)
);

CREATE TABLE IF NOT EXISTS attendance_sessions (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    class_id      INTEGER NOT NULL REFERENCES classes(id),
    session_date  TEXT NOT NULL,
    start_time    TEXT NOT NULL,
    end_time      TEXT,
    is_active     INTEGER NOT NULL DEFAULT 1,
    created_by    INTEGER NOT NULL REFERENCES teachers(id)
);

CREATE TABLE IF NOT EXISTS attendances (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id        INTEGER NOT NULL REFERENCES students(id),
    session_id        INTEGER NOT NULL REFERENCES attendance_sessions(id),
    marked_at         TEXT NOT NULL,
    confidence_score  REAL,
    status            TEXT NOT NULL DEFAULT 'present',
    CONSTRAINT unique_attendance UNIQUE (student_id, session_id)
);

CREATE TABLE IF NOT EXISTS exam_controllers (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    controller_id  TEXT NOT NULL UNIQUE,
    name           TEXT NOT NULL,
    email          TEXT NOT NULL UNIQUE,
    position       TEXT NOT NULL,
    created_at     TEXT NOT NULL
);
"#;

const STUDENT_COLUMNS: &str =
    "s.id, s.student_id, s.name, s.email, s.face_encoding IS NOT NULL, s.photo_path, s.created_at";
const SESSION_COLUMNS: &str =
    "se.id, se.class_id, se.session_date, se.start_time, se.end_time, se.is_active, se.created_by";
const ATTENDANCE_COLUMNS: &str =
    "a.id, a.student_id, a.session_id, a.marked_at, a.confidence_score, a.status";

impl ToSql for AttendanceStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AttendanceStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// What happened to one recognized student when a frame was recorded.
#[derive(Debug, Clone)]
pub enum MarkOutcome {
    Marked(AttendanceRecord),
    AlreadyMarked { student_id: i64 },
}

/// Handle to the attendance database. Cheap to clone.
#[derive(Clone)]
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, AttendanceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).await?;
        let storage = Self { conn };
        storage.migrate().await?;
        info!(path = %path.display(), "attendance database opened");
        Ok(storage)
    }

    pub async fn open_in_memory() -> Result<Self, AttendanceError> {
        let conn = Connection::open_in_memory().await?;
        let storage = Self { conn };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<(), AttendanceError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // --- students -------------------------------------------------------

    pub async fn count_students(&self) -> Result<i64, AttendanceError> {
        let n = self
            .conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?))
            .await?;
        Ok(n)
    }

    /// Insert a student. A reused `student_id` or email is a `DuplicateIdentifier`.
    pub async fn insert_student(&self, new: NewStudent) -> Result<Student, AttendanceError> {
        let now = Utc::now();
        self.conn
            .call(move |conn| {
                let inserted = conn.execute(
                    "INSERT INTO students (student_id, name, email, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![new.student_id, new.name, new.email, now],
                );
                match inserted {
                    Ok(_) => {}
                    Err(e) if is_constraint_violation(&e) => {
                        return Ok(Err(AttendanceError::DuplicateIdentifier(new.student_id)))
                    }
                    Err(e) => return Err(e.into()),
                }
                let id = conn.last_insert_rowid();
                Ok(query_student(conn, "s.id = ?1", &id)?
                    .ok_or_else(|| AttendanceError::StudentNotFound(id.to_string())))
            })
            .await?
    }

    pub async fn get_student(&self, id: i64) -> Result<Option<Student>, AttendanceError> {
        Ok(self
            .conn
            .call(move |conn| Ok(query_student(conn, "s.id = ?1", &id)?))
            .await?)
    }

    /// Look a student up by external identifier ("S001").
    pub async fn find_student(&self, identifier: &str) -> Result<Option<Student>, AttendanceError> {
        let identifier = identifier.to_string();
        Ok(self
            .conn
            .call(move |conn| Ok(query_student(conn, "s.student_id = ?1", &identifier)?))
            .await?)
    }

    pub async fn list_students(&self) -> Result<Vec<Student>, AttendanceError> {
        Ok(self
            .conn
            .call(|conn| {
                let sql = format!("SELECT {STUDENT_COLUMNS} FROM students s ORDER BY s.id");
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], student_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?)
    }

    /// Store a face embedding and photo path against a student.
    pub async fn set_face(
        &self,
        student_id: i64,
        embedding: &Embedding,
        photo_path: &str,
    ) -> Result<(), AttendanceError> {
        let encoded = embedding.to_json();
        let photo_path = photo_path.to_string();
        let updated = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE students SET face_encoding = ?1, photo_path = ?2 WHERE id = ?3",
                    params![encoded, photo_path, student_id],
                )?)
            })
            .await?;
        if updated == 0 {
            return Err(AttendanceError::StudentNotFound(student_id.to_string()));
        }
        Ok(())
    }

    /// The stored embedding for one student, validated on the way out.
    #[cfg(test)]
    pub(crate) async fn stored_embedding(
        &self,
        student_id: i64,
    ) -> Result<Option<Embedding>, AttendanceError> {
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT face_encoding FROM students WHERE id = ?1",
                        [student_id],
                        |r| r.get::<_, Option<String>>(0),
                    )
                    .optional()?
                    .flatten())
            })
            .await?;
        raw.map(|r| {
            Embedding::from_json(&r)
                .map_err(|source| AttendanceError::CorruptEmbedding { student_id, source })
        })
        .transpose()
    }

    /// Every student with a stored embedding. Rows that fail validation are skipped.
    pub async fn known_faces(&self) -> Result<Vec<KnownFace>, AttendanceError> {
        let rows: Vec<(i64, String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, face_encoding FROM students WHERE face_encoding IS NOT NULL ORDER BY id",
                )?;
                let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut faces = Vec::with_capacity(rows.len());
        for (student_id, name, raw) in rows {
            match Embedding::from_json(&raw) {
                Ok(embedding) => faces.push(KnownFace {
                    student_id,
                    name,
                    embedding,
                }),
                Err(e) => warn!(student_id, error = %e, "skipping invalid stored embedding"),
            }
        }
        Ok(faces)
    }

    // --- staff and classes ----------------------------------------------

    pub async fn insert_teacher(
        &self,
        teacher_id: &str,
        name: &str,
        email: &str,
        department: &str,
    ) -> Result<Teacher, AttendanceError> {
        let (teacher_id, name, email, department) = (
            teacher_id.to_string(),
            name.to_string(),
            email.to_string(),
            department.to_string(),
        );
        let now = Utc::now();
        Ok(self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO teachers (teacher_id, name, email, department, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![teacher_id, name, email, department, now],
                )?;
                Ok(Teacher {
                    id: conn.last_insert_rowid(),
                    teacher_id,
                    name,
                    email,
                    department,
                })
            })
            .await?)
    }

    pub async fn list_teachers(&self) -> Result<Vec<Teacher>, AttendanceError> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, teacher_id, name, email, department FROM teachers ORDER BY id",
                )?;
                let rows = stmt.query_map([], |r| {
                    Ok(Teacher {
                        id: r.get(0)?,
                        teacher_id: r.get(1)?,
                        name: r.get(2)?,
                        email: r.get(3)?,
                        department: r.get(4)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?)
    }

    pub async fn teacher_exists(&self, id: i64) -> Result<bool, AttendanceError> {
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row("SELECT 1 FROM teachers WHERE id = ?1", [id], |_| Ok(()))
                    .optional()?
                    .is_some())
            })
            .await?)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_class(
        &self,
        class_code: &str,
        name: &str,
        subject: &str,
        teacher_id: i64,
        schedule_time: &str,
        room: &str,
    ) -> Result<Class, AttendanceError> {
        let class = Class {
            id: 0,
            class_code: class_code.to_string(),
            name: name.to_string(),
            subject: subject.to_string(),
            teacher_id,
            schedule_time: schedule_time.to_string(),
            room: room.to_string(),
        };
        let now = Utc::now();
        Ok(self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO classes (class_code, name, subject, teacher_id, schedule_time, room, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        class.class_code,
                        class.name,
                        class.subject,
                        class.teacher_id,
                        class.schedule_time,
                        class.room,
                        now
                    ],
                )?;
                Ok(Class {
                    id: conn.last_insert_rowid(),
                    ..class
                })
            })
            .await?)
    }

    pub async fn get_class(&self, id: i64) -> Result<Option<Class>, AttendanceError> {
        Ok(self
            .conn
            .call(move |conn| Ok(query_class(conn, id)?))
            .await?)
    }

    pub async fn classes_for_teacher(&self, teacher_id: i64) -> Result<Vec<Class>, AttendanceError> {
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, class_code, name, subject, teacher_id, schedule_time, room
                     FROM classes WHERE teacher_id = ?1 ORDER BY id",
                )?;
                let rows = stmt.query_map([teacher_id], class_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?)
    }

    pub async fn insert_controller(
        &self,
        controller_id: &str,
        name: &str,
        email: &str,
        position: &str,
    ) -> Result<ExamController, AttendanceError> {
        let controller = ExamController {
            id: 0,
            controller_id: controller_id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            position: position.to_string(),
        };
        let now = Utc::now();
        Ok(self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO exam_controllers (controller_id, name, email, position, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        controller.controller_id,
                        controller.name,
                        controller.email,
                        controller.position,
                        now
                    ],
                )?;
                Ok(ExamController {
                    id: conn.last_insert_rowid(),
                    ..controller
                })
            })
            .await?)
    }

    /// Enroll a student in a class. Enrolling twice is a `PersistenceConflict`.
    pub async fn enroll(&self, student_id: i64, class_id: i64) -> Result<Enrollment, AttendanceError> {
        let now = Utc::now();
        self.conn
            .call(move |conn| {
                if query_student(conn, "s.id = ?1", &student_id)?.is_none() {
                    return Ok(Err(AttendanceError::StudentNotFound(student_id.to_string())));
                }
                if query_class(conn, class_id)?.is_none() {
                    return Ok(Err(AttendanceError::ClassNotFound(class_id)));
                }
                match conn.execute(
                    "INSERT INTO enrollments (student_id, class_id, enrolled_at) VALUES (?1, ?2, ?3)",
                    params![student_id, class_id, now],
                ) {
                    Ok(_) => Ok(Ok(Enrollment {
                        id: conn.last_insert_rowid(),
                        student_id,
                        class_id,
                        enrolled_at: now,
                    })),
                    Err(e) if is_constraint_violation(&e) => {
                        Ok(Err(AttendanceError::PersistenceConflict(format!(
                            "student {student_id} is already enrolled in class {class_id}"
                        ))))
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?
    }

    // --- sessions -------------------------------------------------------

    /// Create an active session for a class, owned by the class's teacher.
    pub async fn create_session(
        &self,
        class_id: i64,
        session_date: NaiveDate,
        start_time: DateTime<Utc>,
    ) -> Result<AttendanceSession, AttendanceError> {
        self.conn
            .call(move |conn| {
                let Some(class) = query_class(conn, class_id)? else {
                    return Ok(Err(AttendanceError::ClassNotFound(class_id)));
                };
                conn.execute(
                    "INSERT INTO attendance_sessions (class_id, session_date, start_time, is_active, created_by)
                     VALUES (?1, ?2, ?3, 1, ?4)",
                    params![class_id, session_date, start_time, class.teacher_id],
                )?;
                Ok(Ok(AttendanceSession {
                    id: conn.last_insert_rowid(),
                    class_id,
                    session_date,
                    start_time,
                    end_time: None,
                    is_active: true,
                    created_by: class.teacher_id,
                }))
            })
            .await?
    }

    pub async fn get_session(&self, id: i64) -> Result<Option<AttendanceSession>, AttendanceError> {
        Ok(self
            .conn
            .call(move |conn| Ok(query_session(conn, id)?))
            .await?)
    }

    /// Close an active session. The end time never precedes the start time.
    pub async fn end_session(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<AttendanceSession, AttendanceError> {
        self.conn
            .call(move |conn| {
                let Some(mut session) = query_session(conn, id)? else {
                    return Ok(Err(AttendanceError::SessionNotFound(id)));
                };
                if !session.is_active {
                    return Ok(Err(AttendanceError::SessionEnded(id)));
                }
                let end = now.max(session.start_time);
                conn.execute(
                    "UPDATE attendance_sessions SET end_time = ?1, is_active = 0 WHERE id = ?2",
                    params![end, id],
                )?;
                session.end_time = Some(end);
                session.is_active = false;
                Ok(Ok(session))
            })
            .await?
    }

    // --- attendance -----------------------------------------------------

    /// Record one frame's recognitions atomically.
    ///
    /// Each `(student_id, confidence)` is checked against the table first;
    /// students who already have a row for the session are reported as
    /// `AlreadyMarked`. A uniqueness violation on insert rolls back the whole
    /// frame and surfaces as `PersistenceConflict`.
    pub async fn record_attendance(
        &self,
        session_id: i64,
        candidates: Vec<(i64, f32)>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MarkOutcome>, AttendanceError> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                match query_session(&tx, session_id)? {
                    None => return Ok(Err(AttendanceError::SessionNotFound(session_id))),
                    Some(s) if !s.is_active => {
                        return Ok(Err(AttendanceError::SessionEnded(session_id)))
                    }
                    Some(_) => {}
                }

                let mut outcomes = Vec::with_capacity(candidates.len());
                for (student_id, confidence) in candidates {
                    let existing = tx
                        .query_row(
                            "SELECT id FROM attendances WHERE student_id = ?1 AND session_id = ?2",
                            [student_id, session_id],
                            |r| r.get::<_, i64>(0),
                        )
                        .optional()?;
                    if existing.is_some() {
                        outcomes.push(MarkOutcome::AlreadyMarked { student_id });
                        continue;
                    }

                    let status = AttendanceStatus::Present;
                    let inserted = tx.execute(
                        "INSERT INTO attendances (student_id, session_id, marked_at, confidence_score, status)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![student_id, session_id, now, confidence as f64, status],
                    );
                    match inserted {
                        Ok(_) => outcomes.push(MarkOutcome::Marked(AttendanceRecord {
                            id: tx.last_insert_rowid(),
                            student_id,
                            session_id,
                            marked_at: now,
                            confidence: Some(confidence),
                            status,
                        })),
                        Err(e) if is_constraint_violation(&e) => {
                            return Ok(Err(AttendanceError::PersistenceConflict(format!(
                                "attendance for student {student_id} in session {session_id}: {e}"
                            ))))
                        }
                        Err(e) => return Err(e.into()),
                    }
                }

                tx.commit()?;
                Ok(Ok(outcomes))
            })
            .await?
    }

    #[cfg(test)]
    pub(crate) async fn attendance_for_session(
        &self,
        session_id: i64,
    ) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        Ok(self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {ATTENDANCE_COLUMNS} FROM attendances a WHERE a.session_id = ?1 ORDER BY a.id"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([session_id], |r| attendance_from_row(r, 0))?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?)
    }

    /// Every enrolled student with their record, or `absent` when none exists.
    pub async fn session_report(&self, session_id: i64) -> Result<SessionReport, AttendanceError> {
        self.conn
            .call(move |conn| {
                let Some(session) = query_session(conn, session_id)? else {
                    return Ok(Err(AttendanceError::SessionNotFound(session_id)));
                };

                let sql = format!(
                    "SELECT {STUDENT_COLUMNS}, {ATTENDANCE_COLUMNS}
                     FROM students s
                     JOIN enrollments e ON e.student_id = s.id
                     LEFT JOIN attendances a ON a.student_id = s.id AND a.session_id = ?1
                     WHERE e.class_id = ?2
                     ORDER BY s.student_id"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![session_id, session.class_id], |r| {
                    let student = student_from_row(r)?;
                    let attendance = match r.get::<_, Option<i64>>(7)? {
                        Some(_) => Some(attendance_from_row(r, 7)?),
                        None => None,
                    };
                    let status = attendance
                        .as_ref()
                        .map(|a| a.status)
                        .unwrap_or(AttendanceStatus::Absent);
                    Ok(ReportRow {
                        student,
                        attendance,
                        status,
                    })
                })?;
                let rows = rows.collect::<Result<Vec<_>, _>>()?;
                Ok(Ok(SessionReport { session, rows }))
            })
            .await?
    }

    /// A student's attendance history, newest session first.
    pub async fn attendance_history(
        &self,
        identifier: &str,
    ) -> Result<Vec<AttendanceHistoryEntry>, AttendanceError> {
        let identifier = identifier.to_string();
        self.conn
            .call(move |conn| {
                let Some(student) = query_student(conn, "s.student_id = ?1", &identifier)? else {
                    return Ok(Err(AttendanceError::StudentNotFound(identifier)));
                };
                let sql = format!(
                    "SELECT {ATTENDANCE_COLUMNS}, {SESSION_COLUMNS}, c.name, c.class_code
                     FROM attendances a
                     JOIN attendance_sessions se ON se.id = a.session_id
                     JOIN classes c ON c.id = se.class_id
                     WHERE a.student_id = ?1
                     ORDER BY se.session_date DESC, se.start_time DESC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([student.id], |r| {
                    Ok(AttendanceHistoryEntry {
                        record: attendance_from_row(r, 0)?,
                        session: session_from_row(r, 6)?,
                        class_name: r.get(13)?,
                        class_code: r.get(14)?,
                    })
                })?;
                Ok(Ok(rows.collect::<Result<Vec<_>, _>>()?))
            })
            .await?
    }

    // --- reporting ------------------------------------------------------

    pub async fn dashboard(&self) -> Result<DashboardStats, AttendanceError> {
        Ok(self
            .conn
            .call(|conn| {
                let count = |table: &str| -> rusqlite::Result<i64> {
                    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
                };
                let total_students = count("students")?;
                let total_classes = count("classes")?;
                let total_sessions = count("attendance_sessions")?;

                let sql = format!(
                    "SELECT {SESSION_COLUMNS}, c.name
                     FROM attendance_sessions se JOIN classes c ON c.id = se.class_id
                     ORDER BY se.start_time DESC LIMIT 10"
                );
                let mut stmt = conn.prepare(&sql)?;
                let recent_sessions = stmt
                    .query_map([], |r| {
                        Ok(RecentSession {
                            session: session_from_row(r, 0)?,
                            class_name: r.get(7)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(DashboardStats {
                    total_students,
                    total_classes,
                    total_sessions,
                    recent_sessions,
                })
            })
            .await?)
    }

    /// Per-class session and attendance counts.
    pub async fn class_stats(&self) -> Result<Vec<ClassStats>, AttendanceError> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.name, c.subject, COUNT(DISTINCT se.id), COUNT(a.id)
                     FROM classes c
                     LEFT JOIN attendance_sessions se ON se.class_id = c.id
                     LEFT JOIN attendances a ON a.session_id = se.id
                     GROUP BY c.id
                     ORDER BY c.id",
                )?;
                let rows = stmt.query_map([], |r| {
                    Ok(ClassStats {
                        class_id: r.get(0)?,
                        name: r.get(1)?,
                        subject: r.get(2)?,
                        total_sessions: r.get(3)?,
                        total_attendances: r.get(4)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?)
    }
}

fn query_student(
    conn: &rusqlite::Connection,
    predicate: &str,
    value: &dyn ToSql,
) -> rusqlite::Result<Option<Student>> {
    let sql = format!("SELECT {STUDENT_COLUMNS} FROM students s WHERE {predicate}");
    conn.query_row(&sql, [value], student_from_row).optional()
}

fn query_class(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<Class>> {
    conn.query_row(
        "SELECT id, class_code, name, subject, teacher_id, schedule_time, room FROM classes WHERE id = ?1",
        [id],
        class_from_row,
    )
    .optional()
}

fn query_session(
    conn: &rusqlite::Connection,
    id: i64,
) -> rusqlite::Result<Option<AttendanceSession>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM attendance_sessions se WHERE se.id = ?1");
    conn.query_row(&sql, [id], |r| session_from_row(r, 0)).optional()
}

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        student_id: r.get(1)?,
        name: r.get(2)?,
        email: r.get(3)?,
        has_face: r.get(4)?,
        photo_path: r.get(5)?,
        created_at: r.get(6)?,
    })
}

fn class_from_row(r: &Row<'_>) -> rusqlite::Result<Class> {
    Ok(Class {
        id: r.get(0)?,
        class_code: r.get(1)?,
        name: r.get(2)?,
        subject: r.get(3)?,
        teacher_id: r.get(4)?,
        schedule_time: r.get(5)?,
        room: r.get(6)?,
    })
}

fn session_from_row(r: &Row<'_>, at: usize) -> rusqlite::Result<AttendanceSession> {
    Ok(AttendanceSession {
        id: r.get(at)?,
        class_id: r.get(at + 1)?,
        session_date: r.get(at + 2)?,
        start_time: r.get(at + 3)?,
        end_time: r.get(at + 4)?,
        is_active: r.get(at + 5)?,
        created_by: r.get(at + 6)?,
    })
}

fn attendance_from_row(r: &Row<'_>, at: usize) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: r.get(at)?,
        student_id: r.get(at + 1)?,
        session_id: r.get(at + 2)?,
        marked_at: r.get(at + 3)?,
        confidence: r.get::<_, Option<f64>>(at + 4)?.map(|c| c as f32),
        status: r.get(at + 5)?,
    })
}
