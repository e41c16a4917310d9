//! Sample roster loaded into a fresh database.

use crate::error::AttendanceError;
use crate::models::NewStudent;
use crate::store::Storage;
use tracing::info;

const STUDENTS: [(&str, &str, &str); 3] = [
    ("S001", "Alice Johnson", "alice@student.edu"),
    ("S002", "Bob Wilson", "bob@student.edu"),
    ("S003", "Carol Davis", "carol@student.edu"),
];

/// Insert one teacher, one class, three enrolled students and an exam
/// controller. Does nothing when any student already exists.
pub async fn seed_sample_data(store: &Storage) -> Result<bool, AttendanceError> {
    if store.count_students().await? > 0 {
        return Ok(false);
    }

    let teacher = store
        .insert_teacher(
            "T001",
            "Dr. John Smith",
            "john.smith@university.edu",
            "Computer Science",
        )
        .await?;
    let class = store
        .insert_class(
            "CS101",
            "Introduction to Programming",
            "Computer Science",
            teacher.id,
            "MWF 10:00-11:00",
            "Room 101",
        )
        .await?;

    for (student_id, name, email) in STUDENTS {
        let student = store
            .insert_student(NewStudent {
                student_id: student_id.into(),
                name: name.into(),
                email: email.into(),
            })
            .await?;
        store.enroll(student.id, class.id).await?;
    }

    store
        .insert_controller(
            "C001",
            "Prof. Sarah Brown",
            "sarah.brown@university.edu",
            "Examination Controller",
        )
        .await?;

    info!(students = STUDENTS.len(), class = %class.class_code, "sample data seeded");
    Ok(true)
}
