use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use percept_core::{
    ClassLabels, Detection, DirectoryMatcher, DistanceMetric, Image, InferencePipeline,
    OnnxDetector, OnnxEmbedder, OnnxFaceLocator, PipelineError, TargetSize,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod config;

use config::Config;

type Pipeline = InferencePipeline<OnnxDetector, DirectoryMatcher<OnnxEmbedder, OnnxFaceLocator>>;

#[derive(Parser)]
#[command(name = "percept", about = "Object detection and face recognition with ONNX models")]
struct Cli {
    /// TOML configuration file (defaults to $PERCEPT_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect objects in an image
    Detect {
        /// Image file to analyse
        image: PathBuf,
        /// Detector ONNX model (overrides the configured one)
        #[arg(short, long)]
        model: Option<PathBuf>,
        /// Minimum confidence; detections at or below it are dropped
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Class-name file (one per line, or a JSON array)
        #[arg(short, long)]
        labels: Option<PathBuf>,
        /// Print detections as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find the closest reference face for an image
    Recognize {
        /// Image file to identify
        image: PathBuf,
        /// Directory of reference images
        #[arg(long)]
        db: Option<PathBuf>,
        /// Embedder ONNX model (overrides the configured one)
        #[arg(short, long)]
        model: Option<PathBuf>,
        /// Distance metric: cosine, euclidean or euclidean_l2
        #[arg(long)]
        metric: Option<DistanceMetric>,
        /// Maximum distance for a reference to count as a match
        #[arg(long)]
        max_distance: Option<f32>,
        /// Embed whole images instead of the located face
        #[arg(long)]
        whole_image: bool,
        /// Fail when no reference matches
        #[arg(long)]
        require: bool,
        /// Print the match as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Detect { image, model, threshold, labels, json } => {
            if let Some(model) = model {
                config.detector_model = model;
            }
            if let Some(threshold) = threshold {
                config.confidence_threshold = threshold;
            }
            if labels.is_some() {
                config.labels_path = labels;
            }
            run_detect(&config, &image, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Recognize { image, db, model, metric, max_distance, whole_image, require, json } => {
            if let Some(db) = db {
                config.db_path = db;
            }
            if let Some(model) = model {
                config.embedder_model = model;
            }
            if let Some(metric) = metric {
                config.distance_metric = metric;
            }
            if max_distance.is_some() {
                config.distance_threshold = max_distance;
            }
            if whole_image {
                config.locate_faces = false;
            }
            run_recognize(&config, &image, require, json)
        }
    }
}

fn run_detect(config: &Config, image_path: &Path, json: bool) -> Result<()> {
    let labels = config
        .labels_path
        .as_ref()
        .map(ClassLabels::load)
        .transpose()
        .context("loading class labels")?
        .unwrap_or_default();

    let model_path = config.detector_model_path();
    let detector = OnnxDetector::load(&model_path, TargetSize::square(config.detector_input_size))
        .with_context(|| format!("loading detector {}", model_path.display()))?;
    let mut pipeline: Pipeline = InferencePipeline::new(Some(detector), None)
        .with_confidence_threshold(config.confidence_threshold);

    let image = Image::open(image_path)?;
    let detections = pipeline.detect(&image)?;
    tracing::info!(
        candidates = detections.candidates(),
        threshold = detections.threshold(),
        "detection finished"
    );

    if json {
        let rows: Vec<serde_json::Value> = detections
            .iter()
            .map(|d| detection_json(&d, &labels))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let mut any = false;
    for d in detections.iter() {
        any = true;
        match labels.name(d.class_id) {
            Some(name) => println!("Class ID: {} ({name}), Confidence: {}", d.class_id, d.confidence),
            None => println!("Class ID: {}, Confidence: {}", d.class_id, d.confidence),
        }
        println!("Bounding box: {:?}", d.bbox);
    }
    if !any {
        println!("No detections above {}.", detections.threshold());
    }

    Ok(())
}

fn detection_json(d: &Detection, labels: &ClassLabels) -> serde_json::Value {
    serde_json::json!({
        "class_id": d.class_id,
        "class_name": labels.name(d.class_id),
        "confidence": d.confidence,
        "bbox": d.bbox,
    })
}

fn run_recognize(config: &Config, image_path: &Path, require: bool, json: bool) -> Result<ExitCode> {
    let model_path = config.embedder_model_path();
    let embedder = OnnxEmbedder::load(&model_path)
        .with_context(|| format!("loading embedder {}", model_path.display()))?;
    let locator = if config.locate_faces {
        let path = config.face_detector_model_path();
        let locator = OnnxFaceLocator::load(&path)
            .with_context(|| format!("loading face detector {}", path.display()))?;
        Some(locator)
    } else {
        None
    };
    let matcher = DirectoryMatcher::new(embedder, config.distance_metric)
        .with_threshold(config.effective_distance_threshold())
        .with_optional_locator(locator);
    let mut pipeline: Pipeline = InferencePipeline::new(None, Some(matcher));

    let image = Image::open(image_path)?;
    let found = if require {
        match pipeline.recognize_required(&image, &config.db_path) {
            Ok(m) => Some(m),
            Err(PipelineError::NoMatchFound) => {
                eprintln!("No matches found in {}.", config.db_path.display());
                return Ok(ExitCode::FAILURE);
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        pipeline.recognize(&image, &config.db_path)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    } else {
        match found {
            Some(m) => println!("Matching image name: {}", m.identity_label),
            None => println!("No matches found."),
        }
    }

    Ok(ExitCode::SUCCESS)
}
