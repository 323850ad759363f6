//! Kiosk configuration: platform defaults, optional TOML deployment
//! file, `ROLLCALL_*` environment variables, then CLI flags — later
//! layers override earlier ones.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Hardware class the kiosk runs on. Decides whether the cheap face
/// gate runs before recognition and how many frames are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Developer laptop or desktop: recognition on every processed frame.
    Laptop,
    /// Single-board edge device: gated perception, more frame skipping.
    Edge,
}

impl Platform {
    /// Autodetect: ARM boards expose a device-tree model string.
    pub fn detect() -> Self {
        if cfg!(target_arch = "aarch64") || Path::new("/proc/device-tree/model").exists() {
            Platform::Edge
        } else {
            Platform::Laptop
        }
    }
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct KioskConfig {
    /// Device identifier registered with the backend. Required.
    pub device_id: Option<String>,
    pub backend_url: String,
    /// V4L2 device path, or a directory of images for bench playback.
    pub camera: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Directory for kiosk-owned snapshots (gallery, schedule cache, queue).
    pub data_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub match_threshold: f32,
    /// Stricter threshold for sensitive flows (documented, unused by
    /// the default loop).
    pub strict_threshold: f32,
    /// Seconds a matched person is suppressed after a processed cycle.
    pub cooldown_secs: u64,
    /// Process every Nth captured frame.
    pub frame_skip: usize,
    /// Run the low-res face gate before recognition.
    pub gated_perception: bool,
    /// Seconds to wait for a confirming gesture.
    pub gesture_timeout_secs: u64,
    /// Consecutive identical classifications required to confirm.
    pub gesture_frames: usize,
    /// Seconds between idle heartbeats / queue flush attempts.
    pub idle_interval_secs: u64,
}

/// Optional deployment file; every field overrides the platform default.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    device_id: Option<String>,
    backend_url: Option<String>,
    camera: Option<String>,
    model_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    match_threshold: Option<f32>,
    strict_threshold: Option<f32>,
    cooldown_secs: Option<u64>,
    frame_skip: Option<usize>,
    gated_perception: Option<bool>,
    gesture_timeout_secs: Option<u64>,
    gesture_frames: Option<usize>,
    idle_interval_secs: Option<u64>,
}

impl KioskConfig {
    /// Platform-tuned defaults.
    pub fn defaults(platform: Platform) -> Self {
        let (frame_skip, gated) = match platform {
            Platform::Laptop => (3, false),
            Platform::Edge => (5, true),
        };

        Self {
            device_id: None,
            backend_url: "http://localhost:8000".to_string(),
            camera: "/dev/video0".to_string(),
            model_dir: PathBuf::from("/usr/share/rollcall/models"),
            data_dir: PathBuf::from("/var/lib/rollcall"),
            match_threshold: 0.35,
            strict_threshold: 0.50,
            cooldown_secs: 10,
            frame_skip,
            gated_perception: gated,
            gesture_timeout_secs: 8,
            gesture_frames: 3,
            idle_interval_secs: 30,
        }
    }

    /// Overlay values from a TOML deployment file.
    pub fn apply_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&raw)?;

        macro_rules! take {
            ($($field:ident),+) => {
                $(if let Some(v) = file.$field { self.$field = v.into(); })+
            };
        }
        take!(
            backend_url, camera, model_dir, data_dir, match_threshold,
            strict_threshold, cooldown_secs, frame_skip, gated_perception,
            gesture_timeout_secs, gesture_frames, idle_interval_secs
        );
        if file.device_id.is_some() {
            self.device_id = file.device_id;
        }

        tracing::info!(path = %path.display(), "applied deployment config");
        Ok(())
    }

    /// Overlay `ROLLCALL_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_DEVICE_ID") {
            self.device_id = Some(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_BACKEND_URL") {
            self.backend_url = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA") {
            self.camera = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        self.match_threshold = env_f32("ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.strict_threshold = env_f32("ROLLCALL_STRICT_THRESHOLD", self.strict_threshold);
        self.cooldown_secs = env_u64("ROLLCALL_COOLDOWN_SECS", self.cooldown_secs);
        self.frame_skip = env_usize("ROLLCALL_FRAME_SKIP", self.frame_skip);
        self.gesture_timeout_secs =
            env_u64("ROLLCALL_GESTURE_TIMEOUT_SECS", self.gesture_timeout_secs);
        self.gesture_frames = env_usize("ROLLCALL_GESTURE_FRAMES", self.gesture_frames);
        self.idle_interval_secs = env_u64("ROLLCALL_IDLE_INTERVAL_SECS", self.idle_interval_secs);
        if let Ok(v) = std::env::var("ROLLCALL_GATED_PERCEPTION") {
            self.gated_perception = v != "0";
        }
    }

    /// Path to the face gate / localizer model.
    pub fn gate_model_path(&self) -> String {
        self.model_dir
            .join("blazeface_front.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace embedding model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the hand landmark model.
    pub fn hand_model_path(&self) -> String {
        self.model_dir
            .join("hand_landmark_full.onnx")
            .to_string_lossy()
            .into_owned()
    }

    pub fn gallery_path(&self) -> PathBuf {
        self.data_dir.join("gallery.json")
    }

    pub fn schedule_cache_path(&self) -> PathBuf {
        self.data_dir.join("schedule_cache.json")
    }

    pub fn offline_queue_path(&self) -> PathBuf {
        self.data_dir.join("offline_queue.json")
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
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
