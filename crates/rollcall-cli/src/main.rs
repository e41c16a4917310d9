use anyhow::Result;
use clap::{Parser, Subcommand};
use rollcall_hw::Camera;
use serde_json::{json, Value};
use std::path::PathBuf;

mod client;

use client::DaemonClient;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall classroom attendance CLI")]
struct Cli {
    /// Daemon base URL
    #[arg(long, env = "ROLLCALL_URL", default_value = "http://127.0.0.1:5000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// List registered students
    Students,
    /// Register a new student
    AddStudent {
        /// External identifier (e.g. "S004")
        student_id: String,
        name: String,
        email: String,
    },
    /// Register a student's face from a photo containing exactly one face
    RegisterFace {
        /// External identifier (e.g. "S001")
        student_id: String,
        photo: PathBuf,
    },
    /// Enroll a student in a class
    Enroll { student_id: String, class_id: i64 },
    /// Start an attendance session for a class
    Start { class_id: i64 },
    /// End an attendance session
    End { session_id: i64 },
    /// Print a session's attendance report
    Report { session_id: i64 },
    /// Start or stop the daemon's camera
    Camera {
        #[command(subcommand)]
        action: CameraAction,
    },
    /// List local V4L2 capture devices
    Devices,
}

#[derive(Subcommand)]
enum CameraAction {
    Start,
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let daemon = DaemonClient::new(&cli.server);

    match cli.command {
        Commands::Status => print_json(&daemon.get("/health").await?),
        Commands::Students => {
            let listing = daemon.get("/api/students").await?;
            for s in listing["students"].as_array().into_iter().flatten() {
                let face = if s["has_face"] == true { "face" } else { "no face" };
                println!(
                    "{:<8} {:<24} {:<28} {}",
                    s["student_id"].as_str().unwrap_or("-"),
                    s["name"].as_str().unwrap_or("-"),
                    s["email"].as_str().unwrap_or("-"),
                    face
                );
            }
        }
        Commands::AddStudent {
            student_id,
            name,
            email,
        } => {
            let body = json!({ "student_id": student_id, "name": name, "email": email });
            print_json(&daemon.post("/api/students", Some(body)).await?);
        }
        Commands::RegisterFace { student_id, photo } => {
            let id = daemon.student_db_id(&student_id).await?;
            daemon.upload_photo(id, &photo).await?;
            println!("Face registered for {student_id}");
        }
        Commands::Enroll {
            student_id,
            class_id,
        } => {
            let body = json!({ "student_id": student_id });
            daemon
                .post(&format!("/api/classes/{class_id}/enrollments"), Some(body))
                .await?;
            println!("Enrolled {student_id} in class {class_id}");
        }
        Commands::Start { class_id } => {
            let session = daemon
                .post(&format!("/api/classes/{class_id}/sessions"), None)
                .await?;
            println!("Session {} started for class {class_id}", session["id"]);
        }
        Commands::End { session_id } => {
            daemon
                .post(&format!("/api/sessions/{session_id}/end"), None)
                .await?;
            println!("Session {session_id} ended");
        }
        Commands::Report { session_id } => {
            let report = daemon
                .get(&format!("/api/sessions/{session_id}/report"))
                .await?;
            print_report(&report);
        }
        Commands::Camera { action } => {
            let path = match action {
                CameraAction::Start => "/api/camera/start",
                CameraAction::Stop => "/api/camera/stop",
            };
            let reply = daemon.post(path, None).await?;
            println!("{}", reply["status"].as_str().unwrap_or("ok"));
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

fn print_report(report: &Value) {
    let session = &report["session"];
    println!(
        "Session {} (class {}, {})",
        session["id"], session["class_id"], session["session_date"]
    );
    let mut present = 0;
    let rows = report["rows"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    for row in rows {
        let status = row["status"].as_str().unwrap_or("absent");
        if status != "absent" {
            present += 1;
        }
        let confidence = row["attendance"]["confidence"]
            .as_f64()
            .map(|c| format!("{c:.2}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} {:<24} {:<8} {}",
            row["student"]["student_id"].as_str().unwrap_or("-"),
            row["student"]["name"].as_str().unwrap_or("-"),
            status,
            confidence
        );
    }
    println!("{present}/{} present", rows.len());
}
