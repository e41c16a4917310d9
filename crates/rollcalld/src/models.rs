//! Records held in the attendance database.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A registered student. The embedding itself stays in the store and the roster cache.
#[derive(Debug, Clone, Serialize)]
pub struct Student {
    pub id: i64,
    /// External identifier such as "S001".
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub has_face: bool,
    pub photo_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewStudent {
    pub student_id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Teacher {
    pub id: i64,
    pub teacher_id: String,
    pub name: String,
    pub email: String,
    pub department: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Class {
    pub id: i64,
    pub class_code: String,
    pub name: String,
    pub subject: String,
    pub teacher_id: i64,
    pub schedule_time: String,
    pub room: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExamController {
    pub id: i64,
    pub controller_id: String,
    pub name: String,
    pub email: String,
    pub position: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub class_id: i64,
    pub enrolled_at: DateTime<Utc>,
}

/// A bounded window during which recognized students are marked for one class.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceSession {
    pub id: i64,
    pub class_id: i64,
    pub session_date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    /// Teacher who owns the session.
    pub created_by: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

/// One student's attendance in one session.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: i64,
    pub session_id: i64,
    pub marked_at: DateTime<Utc>,
    pub confidence: Option<f32>,
    pub status: AttendanceStatus,
}

/// Report line: an enrolled student and their record, if any.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub student: Student,
    pub attendance: Option<AttendanceRecord>,
    /// The record's status, or `absent` when nothing was recorded.
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session: AttendanceSession,
    pub rows: Vec<ReportRow>,
}

/// A student's attendance joined with its session and class.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceHistoryEntry {
    pub record: AttendanceRecord,
    pub session: AttendanceSession,
    pub class_name: String,
    pub class_code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentSession {
    pub session: AttendanceSession,
    pub class_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_students: i64,
    pub total_classes: i64,
    pub total_sessions: i64,
    pub recent_sessions: Vec<RecentSession>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassStats {
    pub class_id: i64,
    pub name: String,
    pub subject: String,
    pub total_sessions: i64,
    pub total_attendances: i64,
}
