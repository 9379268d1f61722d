//! percept-core — image-to-model inference with confidence-gated results.
//!
//! Preprocesses images into normalized tensors, runs caller-supplied
//! detection and recognition models, and turns their raw output into
//! [`Detection`]s and [`RecognitionMatch`]es. ONNX Runtime backed models are
//! provided in [`detector`], [`embedder`] and [`face_detector`].

pub mod detection;
pub mod detector;
pub mod embedder;
pub mod face_detector;
pub mod gallery;
pub mod labels;
pub mod locator;
pub mod pipeline;
pub mod recognition;
pub mod tensor;
pub mod types;

pub use detection::{
    detect_objects, filter_detections, Detection, DetectionModel, Detections, RawDetections,
    DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use detector::OnnxDetector;
pub use embedder::OnnxEmbedder;
pub use face_detector::OnnxFaceLocator;
pub use gallery::{list_reference_images, DirectoryMatcher, Embedder};
pub use labels::ClassLabels;
pub use locator::{FaceLocator, NoLocator};
pub use pipeline::{InferencePipeline, PipelineError};
pub use recognition::{
    identity_label, recognize_face, require_match, MatchRow, MatchTable, RecognitionMatch,
    RecognitionModel,
};
pub use tensor::{preprocess, Image, NormalizedTensor, TargetSize};
pub use types::{BoundingBox, DistanceMetric, Embedding};

/// Per-user data directory for percept.
///
/// `$XDG_DATA_HOME/percept`, falling back to `~/.local/share/percept`.
pub fn default_data_dir() -> std::path::PathBuf {
    let data_home = std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        });
    data_home.join("percept")
}

/// Default directory holding the ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    default_data_dir().join("models")
}

/// Default directory of reference face images.
pub fn default_faces_dir() -> std::path::PathBuf {
    default_data_dir().join("faces")
}
