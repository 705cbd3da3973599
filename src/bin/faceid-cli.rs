use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceid::pipeline::cache::ModelCache;
use faceid::pipeline::detect::{DetectParams, FaceDetector, SeetaDetector};
use faceid::pipeline::model::{load_or_train, retrain};
use faceid::pipeline::recognize::Recognizer;
use faceid::pipeline::reference::{ReferenceError, ReferenceSet};
use faceid::utils::config::Config;
use faceid::utils::logging;

#[derive(Parser)]
#[command(name = "faceid", version, about = "Face recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize faces in an image
    Recognize {
        /// Path to the image file
        image: PathBuf,
        /// Distance at or above which a face is reported as Unknown
        #[arg(long)]
        tolerance: Option<f64>,
        /// Detector weights file
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Add an image to a person's reference photos
    Add {
        image: PathBuf,
        name: String,
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// List known people and their image counts
    List,
    /// Rescan the reference set and retrain the model
    Encode {
        #[arg(long)]
        tolerance: Option<f64>,
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Remove a person and all of their reference photos
    Remove { name: String },
}

fn main() -> ExitCode {
    logging::init_cli();
    let cli = Cli::parse();
    let cfg = Config::from_env();

    let outcome = match cli.command {
        Commands::Recognize { image, tolerance, model } => recognize(&cfg, &image, tolerance, model),
        Commands::Add { image, name, model } => add(&cfg, &image, &name, model),
        Commands::List => list(&cfg),
        Commands::Encode { tolerance, model } => encode(&cfg, tolerance, model),
        Commands::Remove { name } => remove(&cfg, &name),
    };
    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            println!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn detector_path(cfg: &Config, model: Option<PathBuf>) -> PathBuf {
    model.unwrap_or_else(|| cfg.detector_model.clone())
}

fn load_detector(path: &Path) -> Result<SeetaDetector> {
    SeetaDetector::load(path, DetectParams::default()).context("loading face detector")
}

fn open_store(cfg: &Config) -> Result<(ReferenceSet, ModelCache)> {
    let reference = ReferenceSet::open(&cfg.known_faces).context("opening known faces directory")?;
    Ok((reference, ModelCache::new(&cfg.model_file, &cfg.labels_file)))
}

fn recognize(cfg: &Config, image: &Path, tolerance: Option<f64>, model: Option<PathBuf>) -> Result<bool> {
    if !image.exists() {
        println!("Error: Image file not found: {}", image.display());
        return Ok(false);
    }
    let tolerance = tolerance.unwrap_or(cfg.unknown_distance);
    let weights = detector_path(cfg, model);
    println!("Loading recognizer (tolerance={tolerance}, model={})...", weights.display());

    let mut detector = load_detector(&weights)?;
    let (reference, cache) = open_store(cfg)?;
    let (face_model, _) = load_or_train(&reference, &cache, &mut detector)?;
    let mut recognizer = Recognizer::new(Box::new(detector), Arc::new(face_model), tolerance);

    println!("Recognizing faces in: {}", image.display());
    let report = recognizer.recognize_path(image);
    if let Some(error) = report.error {
        println!("Error: {error}");
        return Ok(false);
    }

    println!("\nFound {} face(s):", report.faces.len());
    println!("{}", "-".repeat(50));
    for (i, face) in report.faces.iter().enumerate() {
        let loc = face.location;
        println!("\nFace {}:", i + 1);
        println!("  Name: {}", face.name);
        println!("  Confidence: {:.4}", face.confidence);
        println!("  Location: ({}, {}, {}, {})", loc.left, loc.top, loc.right, loc.bottom);
    }
    Ok(true)
}

fn add(cfg: &Config, image: &Path, name: &str, model: Option<PathBuf>) -> Result<bool> {
    if !image.exists() {
        println!("Error: Image file not found: {}", image.display());
        return Ok(false);
    }
    println!("Adding face for: {name}");
    println!("Image: {}", image.display());

    let (reference, cache) = open_store(cfg)?;
    if let Err(e) = reference.add_image(image, name) {
        println!("✗ Error adding face: {e}");
        return Ok(false);
    }
    cache.invalidate()?;

    // The detector is optional here; without it the image is still stored.
    match load_detector(&detector_path(cfg, model)) {
        Ok(mut detector) => match image::open(image) {
            Ok(img) if detector.detect(&img.to_luma8()).is_empty() => {
                println!("! No face detected in {}; it will be skipped during training", image.display());
            }
            Ok(_) => {}
            Err(e) => println!("! Could not decode {}: {e}", image.display()),
        },
        Err(e) => tracing::warn!(error = %e, "skipping face check"),
    }

    println!("✓ Face added for {name}");
    Ok(true)
}

fn list(cfg: &Config) -> Result<bool> {
    if !cfg.known_faces.is_dir() {
        println!("No known faces directory found.");
        return Ok(true);
    }
    let (reference, _) = open_store(cfg)?;
    let people = reference.people_with_counts()?;
    if people.is_empty() {
        println!("No known faces found.");
        return Ok(true);
    }

    println!("Known Faces:");
    println!("{}", "-".repeat(50));
    for person in &people {
        println!("  {}: {} image(s)", person.name, person.images);
    }
    println!("{}", "-".repeat(50));
    println!("Total: {} person(s)", people.len());
    Ok(true)
}

fn encode(cfg: &Config, tolerance: Option<f64>, model: Option<PathBuf>) -> Result<bool> {
    let weights = detector_path(cfg, model);
    match tolerance {
        Some(t) => println!("Loading and encoding known faces (model={}, tolerance={t})...", weights.display()),
        None => println!("Loading and encoding known faces (model={})...", weights.display()),
    }
    let mut detector = load_detector(&weights)?;
    let (reference, cache) = open_store(cfg)?;
    let (face_model, report) = retrain(&reference, &cache, &mut detector)?;

    println!("\n✓ Successfully encoded {} face(s)", report.encoded);
    println!("  Known people: {}", face_model.names().len());
    if report.skipped > 0 {
        println!("  Skipped images: {}", report.skipped);
    }
    Ok(true)
}

fn remove(cfg: &Config, name: &str) -> Result<bool> {
    let (reference, cache) = open_store(cfg)?;
    match reference.remove_person(name) {
        Ok(()) => {
            cache.invalidate()?;
            println!("✓ Deleted {name}");
            Ok(true)
        }
        Err(ReferenceError::PersonNotFound(_) | ReferenceError::InvalidName(_)) => {
            println!("✗ Person not found");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
