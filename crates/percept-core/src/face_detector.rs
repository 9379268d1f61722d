//! SCRFD face locator via ONNX Runtime.
//!
//! Finds faces in RGB images so the embedder sees a tight crop rather than
//! the whole frame. 3-stride anchor decoding followed by NMS.

use crate::locator::FaceLocator;
use crate::pipeline::PipelineError;
use crate::tensor::Image;
use crate::types::BoundingBox;
use ::image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
pub const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_NUM_OUTPUTS: usize = 9;
const SCRFD_POSITIONAL: [StrideOutputIndices; 3] = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];

#[derive(Error, Debug)]
pub enum FaceDetectorError {
    #[error("model file not found: {0} — download det_10g.onnx from insightface and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("image: {0}")]
    Image(#[from] PipelineError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps letterboxed model coordinates back to the source image.
#[derive(Debug, Clone, Copy)]
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl LetterboxInfo {
    fn to_source(self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputIndices = (usize, usize, usize);

/// Raw outputs of one stride level.
struct StrideOutput<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// ONNX Runtime backed [`FaceLocator`].
pub struct OnnxFaceLocator {
    session: Session,
    confidence_threshold: f32,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl OnnxFaceLocator {
    /// Load an SCRFD ONNX model (e.g. insightface `det_10g.onnx`).
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, FaceDetectorError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(FaceDetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded face detection model"
        );

        if output_names.len() < SCRFD_NUM_OUTPUTS {
            return Err(FaceDetectorError::InferenceFailed(format!(
                "SCRFD model requires {SCRFD_NUM_OUTPUTS} outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "face detector output tensor mapping");

        Ok(Self {
            session,
            confidence_threshold: SCRFD_CONFIDENCE_THRESHOLD,
            stride_indices,
        })
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// All faces in `image`, most confident first.
    pub fn detect(&mut self, image: &Image) -> Result<Vec<BoundingBox>, FaceDetectorError> {
        let (input, letterbox) = letterbox(image, SCRFD_INPUT_SIZE)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(&self.stride_indices) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| FaceDetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let output = StrideOutput {
                stride,
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            candidates.extend(decode_stride(
                &output,
                SCRFD_INPUT_SIZE,
                letterbox,
                self.confidence_threshold,
            ));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "face detection complete");
        Ok(faces)
    }
}

impl FaceLocator for OnnxFaceLocator {
    type Error = FaceDetectorError;

    fn locate(&mut self, image: &Image) -> Result<Option<BoundingBox>, FaceDetectorError> {
        Ok(self.detect(image)?.into_iter().next())
    }
}

/// Fit `image` into a `size`×`size` NCHW tensor, centred, normalized to the
/// SCRFD input distribution. Padding normalizes to 0.0.
fn letterbox(image: &Image, size: usize) -> Result<(Array4<f32>, LetterboxInfo), FaceDetectorError> {
    let rgb = image.to_rgb_image()?;
    let (width, height) = rgb.dimensions();

    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as usize).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, size);
    let pad_x = (size - new_w) as f32 / 2.0;
    let pad_y = (size - new_h) as f32 / 2.0;

    let resized = imageops::resize(&rgb, new_w as u32, new_h as u32, FilterType::Triangle);

    let left = pad_x.floor() as usize;
    let top = pad_y.floor() as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for (c, &value) in pixel.0.iter().enumerate() {
            tensor[[0, c, top + y as usize, left + x as usize]] = (value as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    Ok((tensor, LetterboxInfo { scale, pad_x, pad_y }))
}

/// Map output tensors to stride slots by name (`score_8`, `bbox_16`, ...),
/// falling back to positional ordering: scores [0-2], bboxes [3-5], kps [6-8].
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named.and_then(|found| <[StrideOutputIndices; 3]>::try_from(found).ok()) {
        Some(indices) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            indices
        }
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            SCRFD_POSITIONAL
        }
    }
}

/// Decode the anchors of one stride whose score exceeds `threshold`.
fn decode_stride(
    output: &StrideOutput<'_>,
    input_size: usize,
    letterbox: LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let stride = output.stride as f32;
    let grid = input_size / output.stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;

    let mut faces = Vec::new();
    for (idx, &score) in output.scores.iter().take(num_anchors).enumerate() {
        if score <= threshold {
            continue;
        }
        let Some(offsets) = output.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * stride;
        let anchor_y = (cell / grid) as f32 * stride;

        let (x1, y1) = letterbox.to_source(anchor_x - offsets[0] * stride, anchor_y - offsets[1] * stride);
        let (x2, y2) = letterbox.to_source(anchor_x + offsets[2] * stride, anchor_y + offsets[3] * stride);

        let landmarks = output.kps.get(idx * 10..idx * 10 + 10).map(|kps| {
            std::array::from_fn(|i| {
                letterbox.to_source(anchor_x + kps[i * 2] * stride, anchor_y + kps[i * 2 + 1] * stride)
            })
        });

        faces.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
    faces
}

/// Non-Maximum Suppression. Output is sorted by confidence, highest first.
fn nms(mut boxes: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}
