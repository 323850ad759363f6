use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

mod config;
mod kiosk;
mod logger;
mod persist;
mod schedule;
mod state;

use config::{KioskConfig, Platform};
use kiosk::{ConsoleFeedback, Kiosk};
use logger::{AttendanceLogger, OfflineQueue};
use rollcall_client::BackendClient;
use rollcall_core::{EmbeddingGallery, FaceGate, FaceRecognizer, HandLandmarker};
use schedule::ScheduleResolver;

#[derive(Parser)]
#[command(name = "rollcalld", about = "Rollcall attendance kiosk daemon")]
struct Cli {
    /// Device identifier registered with the backend
    #[arg(long)]
    device_id: Option<String>,
    /// Backend base URL
    #[arg(long)]
    backend_url: Option<String>,
    /// Camera device path, or a directory of images for playback
    #[arg(long)]
    camera: Option<String>,
    /// Deployment config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    let handler = handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let platform = Platform::detect();
    let mut cfg = KioskConfig::defaults(platform);
    if let Some(path) = &cli.config {
        cfg.apply_file(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
    }
    cfg.apply_env();
    if cli.device_id.is_some() {
        cfg.device_id = cli.device_id;
    }
    if let Some(url) = cli.backend_url {
        cfg.backend_url = url;
    }
    if let Some(camera) = cli.camera {
        cfg.camera = camera;
    }

    let Some(device_id) = cfg.device_id.clone() else {
        bail!("no device id configured: pass --device-id or set ROLLCALL_DEVICE_ID");
    };

    tracing::info!(
        device_id = %device_id,
        backend = %cfg.backend_url,
        camera = %cfg.camera,
        platform = ?platform,
        gated = cfg.gated_perception,
        "rollcalld starting"
    );

    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("creating data dir {}", cfg.data_dir.display()))?;

    // Fatal startup failures: camera and models.
    let camera = rollcall_hw::open_source(&cfg.camera).context("opening camera")?;
    tracing::info!(source = %camera.describe(), "frame source ready");

    let gate = if cfg.gated_perception {
        Some(FaceGate::load(&cfg.gate_model_path()).context("loading face gate model")?)
    } else {
        None
    };
    let recognizer = FaceRecognizer::load(&cfg.gate_model_path(), &cfg.arcface_model_path())
        .context("loading recognizer models")?;
    let landmarker =
        HandLandmarker::load(&cfg.hand_model_path()).context("loading hand landmark model")?;

    let gallery = EmbeddingGallery::load(&cfg.gallery_path());
    let resolver = ScheduleResolver::load(cfg.schedule_cache_path());
    let queue = OfflineQueue::load(cfg.offline_queue_path());

    let client = BackendClient::with_default_timeout(&cfg.backend_url)
        .context("building backend client")?;
    let logger = AttendanceLogger::new(client.clone(), queue);

    match client.device_info(&device_id) {
        Ok(info) => tracing::info!(room = ?info.room, status = ?info.status, "device registered"),
        Err(e) => tracing::warn!(error = %e, "device info unavailable at startup"),
    }

    install_signal_handlers();

    let mut kiosk = Kiosk::new(
        cfg,
        device_id,
        camera,
        gate,
        recognizer,
        landmarker,
        gallery,
        resolver,
        logger,
        client,
        Box::new(ConsoleFeedback),
    );

    kiosk.run(&SHUTDOWN);

    tracing::info!("rollcalld shutting down");
    kiosk.shutdown();

    Ok(())
}
