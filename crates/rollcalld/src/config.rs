use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub bind_addr: String,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory where registration photos are kept.
    pub upload_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Maximum embedding distance for a positive match.
    pub tolerance: f32,
    /// Frames are shrunk by this factor before detection.
    pub downscale: u32,
    /// Minimum interval between marking attempts for one student in one session.
    pub cooldown: Duration,
    /// Upper bound on suppression buffer entries.
    pub suppression_capacity: usize,
    /// JPEG quality for the live stream.
    pub jpeg_quality: u8,
    /// Largest accepted request body (photo uploads).
    pub max_upload_bytes: usize,
    /// Seed the sample roster into an empty database.
    pub seed_sample_data: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        Self {
            bind_addr: std::env::var("ROLLCALL_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:5000".to_string()),
            db_path: std::env::var("ROLLCALL_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("attendance.db")),
            upload_dir: std::env::var("ROLLCALL_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("uploads")),
            model_dir: std::env::var("ROLLCALL_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/usr/share/rollcall/models")),
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            camera_width: env_parse("ROLLCALL_CAMERA_WIDTH", 640),
            camera_height: env_parse("ROLLCALL_CAMERA_HEIGHT", 480),
            tolerance: env_parse("ROLLCALL_TOLERANCE", rollcall_core::DEFAULT_TOLERANCE),
            downscale: env_parse("ROLLCALL_DOWNSCALE", rollcall_core::DEFAULT_DOWNSCALE).max(1),
            cooldown: Duration::from_secs(env_parse("ROLLCALL_COOLDOWN_SECS", 10)),
            suppression_capacity: env_parse("ROLLCALL_SUPPRESSION_CAPACITY", 4096),
            jpeg_quality: env_parse("ROLLCALL_JPEG_QUALITY", 80),
            max_upload_bytes: env_parse("ROLLCALL_MAX_UPLOAD_BYTES", 10 * 1024 * 1024),
            seed_sample_data: std::env::var("ROLLCALL_SEED_SAMPLE_DATA")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the 128-d face encoder model.
    pub fn encoder_model_path(&self) -> String {
        self.model_dir
            .join("face_encoder_128.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
