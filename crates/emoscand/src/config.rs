use crate::controller::ControllerConfig;
use emoscan_hw::CaptureConstraints;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the detector and expression ONNX models.
    pub model_dir: PathBuf,
    /// Ideal capture constraints passed to the camera on start.
    pub constraints: CaptureConstraints,
    /// How long to wait for the camera's readiness signal before polling
    /// frame dimensions instead.
    pub ready_timeout: Duration,
    /// Frames the camera must have delivered before a scan is allowed.
    pub min_buffered_frames: usize,
    /// Face detector score threshold.
    pub detection_threshold: f32,
    /// Confidence below which a result is logged as low-confidence.
    pub confidence_threshold: f32,
    /// Session name chosen up front, skipping the interactive choice.
    pub user_name: Option<String>,
}

impl Config {
    /// Load configuration from `EMOSCAN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("EMOSCAN_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| emoscan_core::default_model_dir());

        let defaults = CaptureConstraints::default();

        Self {
            camera_device: std::env::var("EMOSCAN_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            constraints: CaptureConstraints {
                width: env_u32("EMOSCAN_WIDTH", defaults.width),
                height: env_u32("EMOSCAN_HEIGHT", defaults.height),
                facing_mode: std::env::var("EMOSCAN_FACING_MODE")
                    .unwrap_or(defaults.facing_mode),
                frame_rate: env_u32("EMOSCAN_FRAME_RATE", defaults.frame_rate),
            },
            ready_timeout: Duration::from_millis(env_u64("EMOSCAN_READY_TIMEOUT_MS", 2000)),
            min_buffered_frames: env_usize("EMOSCAN_MIN_BUFFERED_FRAMES", 2),
            detection_threshold: env_f32("EMOSCAN_DETECTION_THRESHOLD", 0.5),
            confidence_threshold: env_f32("EMOSCAN_CONFIDENCE_THRESHOLD", 0.5),
            user_name: std::env::var("EMOSCAN_USER_NAME").ok(),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            model_base: self.model_dir.to_string_lossy().into_owned(),
            constraints: self.constraints.clone(),
            ready_timeout: self.ready_timeout,
            min_buffered_frames: self.min_buffered_frames,
            confidence_threshold: self.confidence_threshold,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
