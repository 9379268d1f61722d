//! The inference pipeline: preprocessing, model call, confidence gating.
//!
//! Models are handed to [`InferencePipeline::new`] by the caller; nothing is
//! loaded behind the caller's back and no model lives in a global.

use crate::detection::{self, DetectionModel, Detections, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::recognition::{self, RecognitionMatch, RecognitionModel};
use crate::tensor::{self, Image};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("invalid target size {width}x{height}: both dimensions must be positive")]
    InvalidTargetSize { width: u32, height: u32 },
    #[error("malformed model output: {0}")]
    MalformedModelOutput(String),
    #[error("no match found")]
    NoMatchFound,
    #[error("no {0} model configured")]
    ModelMissing(&'static str),
    #[error("model error: {0}")]
    Model(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Detection and recognition over caller-supplied models.
///
/// Either model may be absent; the operations that need it then fail with
/// [`PipelineError::ModelMissing`].
pub struct InferencePipeline<D, R> {
    detector: Option<D>,
    recognizer: Option<R>,
    confidence_threshold: f32,
}

impl<D: DetectionModel, R: RecognitionModel> InferencePipeline<D, R> {
    pub fn new(detector: Option<D>, recognizer: Option<R>) -> Self {
        Self {
            detector,
            recognizer,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Preprocess `image` to the detector's input size and gate its output.
    pub fn detect(&mut self, image: &Image) -> Result<Detections, PipelineError> {
        let detector = self
            .detector
            .as_mut()
            .ok_or(PipelineError::ModelMissing("detection"))?;
        let input = tensor::preprocess(image, detector.input_size())?;
        detection::detect_objects(detector, &input, self.confidence_threshold)
    }

    /// Best match for `image` among the references in `reference_dir`, if any.
    pub fn recognize(
        &mut self,
        image: &Image,
        reference_dir: &Path,
    ) -> Result<Option<RecognitionMatch>, PipelineError> {
        let recognizer = self
            .recognizer
            .as_mut()
            .ok_or(PipelineError::ModelMissing("recognition"))?;
        recognition::recognize_face(recognizer, image, reference_dir)
    }

    /// Like [`recognize`](Self::recognize), but an empty result is [`PipelineError::NoMatchFound`].
    pub fn recognize_required(
        &mut self,
        image: &Image,
        reference_dir: &Path,
    ) -> Result<RecognitionMatch, PipelineError> {
        recognition::require_match(self.recognize(image, reference_dir)?)
    }
}
