use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_client::{AttendanceRecord, BackendClient};
use rollcall_core::{EmbeddingGallery, FaceRecognizer};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall kiosk diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List identities in a gallery snapshot
    Gallery {
        /// Path to gallery.json
        path: PathBuf,
    },
    /// Match a face image against a gallery snapshot
    Probe {
        /// Image file containing one face
        image: PathBuf,
        /// Path to gallery.json
        #[arg(long)]
        gallery: PathBuf,
        /// Directory containing ONNX model files
        #[arg(long)]
        models: PathBuf,
        /// How many candidates to show
        #[arg(short = 'k', long, default_value_t = 5)]
        top: usize,
    },
    /// Show pending records in an offline queue file
    Queue {
        /// Path to offline_queue.json
        path: PathBuf,
    },
    /// Query the backend for this device's current status
    Status {
        #[arg(long)]
        backend_url: String,
        #[arg(long)]
        device_id: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Gallery { path } => {
            let gallery = EmbeddingGallery::load(&path);
            println!("{} identities", gallery.len());
            for id in gallery.identities() {
                println!(
                    "  {:>6}  {:<24} dim={} quality={:.2} model={}",
                    id.user_id,
                    id.name,
                    id.embedding.dim(),
                    id.quality,
                    if id.model_version.is_empty() { "-" } else { &id.model_version },
                );
            }
        }
        Commands::Probe { image, gallery, models, top } => {
            let gallery = EmbeddingGallery::load(&gallery);
            let det = models.join("blazeface_front.onnx");
            let embed = models.join("w600k_r50.onnx");
            let mut recognizer = FaceRecognizer::load(
                &det.to_string_lossy(),
                &embed.to_string_lossy(),
            )
            .context("loading models")?;

            let img = image::open(&image)
                .with_context(|| format!("reading {}", image.display()))?
                .to_rgb8();
            let (width, height) = img.dimensions();

            let Some(reading) = recognizer.read_face(img.as_raw(), width, height)? else {
                println!("no face found in {}", image.display());
                return Ok(());
            };

            println!(
                "face at ({:.0},{:.0}) {:.0}x{:.0}, det score {:.2}",
                reading.bbox.x, reading.bbox.y, reading.bbox.width, reading.bbox.height,
                reading.det_score,
            );
            for (identity, score) in gallery.find_top_k(&reading.embedding, top) {
                println!("  {:.4}  {:>6}  {}", score, identity.user_id, identity.name);
            }
        }
        Commands::Queue { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let records: Vec<AttendanceRecord> =
                serde_json::from_str(&raw).context("parsing queue file")?;
            println!("{} pending records", records.len());
            for r in &records {
                println!(
                    "  {}  user={} class={} {} via {:?}{}",
                    r.timestamp,
                    r.user_id,
                    r.class_id,
                    r.action.label(),
                    r.verified_by,
                    r.remarks.as_deref().map(|m| format!("  {m}")).unwrap_or_default(),
                );
            }
        }
        Commands::Status { backend_url, device_id } => {
            let client = BackendClient::with_default_timeout(&backend_url)?;
            match client.device_info(&device_id) {
                Ok(info) => println!(
                    "device {device_id}: room={} status={}",
                    info.room.as_deref().unwrap_or("-"),
                    info.status.as_deref().unwrap_or("-"),
                ),
                Err(e) => println!("device {device_id}: unavailable ({e})"),
            }
            match client.active_class(&device_id) {
                Ok(Some(class)) => println!(
                    "active class: {} {} ({}-{}) room {}",
                    class.subject_code, class.subject_title, class.start_time, class.end_time,
                    class.room,
                ),
                Ok(None) => println!("no active class"),
                Err(e) => println!("active class: unavailable ({e})"),
            }
        }
    }

    Ok(())
}
