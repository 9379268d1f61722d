use anyhow::{Context, Result};
use percept_core::DistanceMetric;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration.
///
/// Layered: defaults, then an optional TOML file, then `PERCEPT_*`
/// environment variables. Command-line flags are applied last by the caller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Detector model file name, resolved against `model_dir` when relative.
    pub detector_model: PathBuf,
    /// Embedder model file name, resolved against `model_dir` when relative.
    pub embedder_model: PathBuf,
    /// Face detection model file name, resolved against `model_dir` when relative.
    pub face_detector_model: PathBuf,
    /// Crop images to their most confident face before embedding.
    pub locate_faces: bool,
    /// Square input size of the detector.
    pub detector_input_size: u32,
    /// Detections at or below this confidence are dropped.
    pub confidence_threshold: f32,
    /// Directory of labelled reference face images.
    pub db_path: PathBuf,
    pub distance_metric: DistanceMetric,
    /// Match cut-off; the metric's default when unset.
    pub distance_threshold: Option<f32>,
    /// Optional class-name file for detection output.
    pub labels_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: percept_core::default_model_dir(),
            detector_model: PathBuf::from("yolov4.onnx"),
            embedder_model: PathBuf::from("facenet512.onnx"),
            face_detector_model: PathBuf::from("det_10g.onnx"),
            locate_faces: true,
            detector_input_size: percept_core::detector::YOLO_INPUT_SIZE,
            confidence_threshold: percept_core::DEFAULT_CONFIDENCE_THRESHOLD,
            db_path: percept_core::default_faces_dir(),
            distance_metric: DistanceMetric::default(),
            distance_threshold: None,
            labels_path: None,
        }
    }
}

impl Config {
    /// Load from `path` (or `$PERCEPT_CONFIG`) if given, then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("PERCEPT_CONFIG").map(PathBuf::from));

        let mut config = match file {
            Some(file) => {
                let text = std::fs::read_to_string(&file)
                    .with_context(|| format!("reading config {}", file.display()))?;
                let config = Self::from_toml(&text)
                    .with_context(|| format!("parsing config {}", file.display()))?;
                tracing::debug!(path = %file.display(), "loaded config file");
                config
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Override fields from `PERCEPT_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("PERCEPT_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("PERCEPT_DETECTOR_MODEL") {
            self.detector_model = PathBuf::from(v);
        }
        if let Some(v) = var("PERCEPT_EMBEDDER_MODEL") {
            self.embedder_model = PathBuf::from(v);
        }
        if let Some(v) = var("PERCEPT_FACE_DETECTOR_MODEL") {
            self.face_detector_model = PathBuf::from(v);
        }
        if let Some(v) = var("PERCEPT_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("PERCEPT_LABELS_PATH") {
            self.labels_path = Some(PathBuf::from(v));
        }
        self.detector_input_size =
            parsed(&var, "PERCEPT_DETECTOR_INPUT_SIZE").unwrap_or(self.detector_input_size);
        self.confidence_threshold =
            parsed(&var, "PERCEPT_CONFIDENCE_THRESHOLD").unwrap_or(self.confidence_threshold);
        self.distance_metric =
            parsed(&var, "PERCEPT_DISTANCE_METRIC").unwrap_or(self.distance_metric);
        self.locate_faces = parsed(&var, "PERCEPT_LOCATE_FACES").unwrap_or(self.locate_faces);
        if let Some(t) = parsed(&var, "PERCEPT_DISTANCE_THRESHOLD") {
            self.distance_threshold = Some(t);
        }
    }

    /// Path to the detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    /// Path to the face embedding model.
    pub fn embedder_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedder_model)
    }

    /// Path to the face detection model.
    pub fn face_detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.face_detector_model)
    }

    pub fn effective_distance_threshold(&self) -> f32 {
        self.distance_threshold
            .unwrap_or_else(|| self.distance_metric.default_threshold())
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.detector_input_size, 416);
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.distance_metric, DistanceMetric::Cosine);
        assert!((config.effective_distance_threshold() - 0.30).abs() < 1e-6);
        assert!(config.detector_model_path().ends_with("yolov4.onnx"));
        assert_eq!(config.model_dir, percept_core::default_model_dir());
        assert_eq!(config.db_path, percept_core::default_faces_dir());
        assert!(config.locate_faces);
        assert!(config.face_detector_model_path().ends_with("det_10g.onnx"));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
            model_dir = "/opt/models"
            confidence_threshold = 0.65
            distance_metric = "euclidean_l2"
            labels_path = "/opt/models/coco.txt"
            "#,
        )
        .unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(config.confidence_threshold, 0.65);
        assert_eq!(config.distance_metric, DistanceMetric::EuclideanL2);
        assert!((config.effective_distance_threshold() - 1.04).abs() < 1e-6);
        assert_eq!(config.labels_path, Some(PathBuf::from("/opt/models/coco.txt")));
        assert_eq!(config.detector_input_size, 416);
        assert_eq!(config.detector_model_path(), PathBuf::from("/opt/models/yolov4.onnx"));
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        assert!(Config::from_toml("camera_device = \"/dev/video0\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("PERCEPT_MODEL_DIR", "/srv/models"),
            ("PERCEPT_DETECTOR_INPUT_SIZE", "608"),
            ("PERCEPT_CONFIDENCE_THRESHOLD", "0.7"),
            ("PERCEPT_DISTANCE_METRIC", "euclidean"),
            ("PERCEPT_DISTANCE_THRESHOLD", "10.5"),
            ("PERCEPT_DB_PATH", "/srv/faces"),
            ("PERCEPT_FACE_DETECTOR_MODEL", "scrfd_2.5g.onnx"),
            ("PERCEPT_LOCATE_FACES", "false"),
        ]));
        assert_eq!(config.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.detector_input_size, 608);
        assert_eq!(config.confidence_threshold, 0.7);
        assert_eq!(config.distance_metric, DistanceMetric::Euclidean);
        assert_eq!(config.effective_distance_threshold(), 10.5);
        assert_eq!(config.db_path, PathBuf::from("/srv/faces"));
        assert_eq!(config.face_detector_model_path(), PathBuf::from("/srv/models/scrfd_2.5g.onnx"));
        assert!(!config.locate_faces);
    }

    #[test]
    fn test_env_bad_values_keep_defaults() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("PERCEPT_DETECTOR_INPUT_SIZE", "big"),
            ("PERCEPT_CONFIDENCE_THRESHOLD", "high"),
            ("PERCEPT_DISTANCE_METRIC", "manhattan"),
            ("PERCEPT_LOCATE_FACES", "sometimes"),
        ]));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_absolute_model_path_wins() {
        let mut config = Config::default();
        config.detector_model = PathBuf::from("/elsewhere/det.onnx");
        assert_eq!(config.detector_model_path(), PathBuf::from("/elsewhere/det.onnx"));
    }
}
