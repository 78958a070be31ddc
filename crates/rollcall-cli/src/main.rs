mod config;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rollcall_core::onnx::OnnxFaceAnalyzer;
use rollcall_core::{detect_all, Aggregator, Enrollment, ImageSource, SharedDetector};
use rollcall_store::{LocationLocks, Unlocked, VectorStore};
use serde_json::json;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Face enrollment and scene detection")]
struct Cli {
    /// TOML config file (defaults to $ROLLCALL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate enrollment photos into one embedding and print it
    Embed {
        /// Identity key echoed in the output
        #[arg(long)]
        id: String,
        /// Image files or directories of images
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Aggregate enrollment photos and store the result
    Enroll {
        #[arg(long)]
        id: String,
        /// Display name stored alongside the embedding
        #[arg(long)]
        name: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Detect every face in scene photos
    Detect {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List enrolled identities
    List,
    /// Show model, store and threshold configuration
    Status,
}

struct App {
    config: Config,
    detector: SharedDetector<OnnxFaceAnalyzer>,
}

impl App {
    fn new(config: Config) -> Self {
        let paths = config.model_paths();
        let threads = config.intra_threads;
        let detector = SharedDetector::new(move || OnnxFaceAnalyzer::load(&paths, threads));
        Self { config, detector }
    }

    fn enroll(&self, images: &[PathBuf]) -> Result<Enrollment> {
        let sources = expand_sources(images)?;
        let detector = self.detector.get()?;
        let enrollment = Aggregator::new(detector.as_ref(), self.config.policy()).aggregate(&sources)?;
        Ok(enrollment)
    }

    fn upsert(&self, id: &str, name: &str, enrollment: &Enrollment) -> Result<rollcall_store::Upsert> {
        let embedding = accepted(enrollment)?;
        let upsert = if self.config.lock_writes {
            VectorStore::with_lock(&self.config.store_path, LocationLocks::global())
                .upsert(id, name, embedding)?
        } else {
            VectorStore::with_lock(&self.config.store_path, Unlocked).upsert(id, name, embedding)?
        };
        Ok(upsert)
    }
}

/// Rejected enrollments become a user-facing error.
fn accepted(enrollment: &Enrollment) -> Result<&rollcall_core::Embedding> {
    match enrollment {
        Enrollment::Accepted { embedding, .. } => Ok(embedding),
        Enrollment::Rejected {
            images_used,
            required,
        } => bail!(
            "Could not extract {required}+ valid face embeddings. Only {images_used} found. \
             Please upload clearer photos."
        ),
    }
}

/// Files pass through as-is; directories expand to their images.
fn expand_sources(paths: &[PathBuf]) -> Result<Vec<ImageSource>> {
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        if path.is_dir() {
            sources.extend(ImageSource::from_dir(path)?);
        } else {
            sources.push(ImageSource::from(path.clone()));
        }
    }
    Ok(sources)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");
    let app = App::new(config);

    match cli.command {
        Commands::Embed { id, images } => {
            let enrollment = app.enroll(&images)?;
            let embedding = accepted(&enrollment)?;
            print_json(&json!({
                "studentId": id,
                "embedding": embedding,
                "imagesUsed": enrollment.images_used(),
            }))?;
        }
        Commands::Enroll { id, name, images } => {
            let enrollment = app.enroll(&images)?;
            let upsert = app.upsert(&id, &name, &enrollment)?;
            print_json(&json!({
                "id": id,
                "action": upsert.action,
                "total": upsert.total,
                "imagesUsed": enrollment.images_used(),
            }))?;
        }
        Commands::Detect { images } => {
            let sources = expand_sources(&images)?;
            let detector = app.detector.get()?;
            let detections = detect_all(detector.as_ref(), &sources)?;
            tracing::info!(images = sources.len(), faces = detections.len(), "scene detection finished");
            print_json(&detections)?;
        }
        Commands::List => {
            let snapshot = VectorStore::new(&app.config.store_path).load()?;
            let identities: Vec<_> = snapshot
                .iter()
                .map(|record| json!({ "id": record.id, "name": record.name }))
                .collect();
            print_json(&identities)?;
        }
        Commands::Status => {
            let paths = app.config.model_paths();
            let missing = paths.missing();
            let snapshot = VectorStore::new(&app.config.store_path).load()?;
            print_json(&json!({
                "version": env!("CARGO_PKG_VERSION"),
                "models": {
                    "detector": paths.detector,
                    "recognizer": paths.recognizer,
                    "present": missing.is_empty(),
                    "missing": missing,
                },
                "store": {
                    "path": app.config.store_path,
                    "identities": snapshot.len(),
                },
                "thresholds": {
                    "minValidImages": app.config.min_valid_images,
                    "requiredImages": app.config.required_images,
                    "effectiveMinimum": app.config.policy().effective_minimum(),
                },
            }))?;
        }
    }

    Ok(())
}
