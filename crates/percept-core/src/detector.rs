//! YOLO-style object detector via ONNX Runtime.
//!
//! Expects a model with one NHWC float input and four outputs for a
//! single-image batch: boxes `[1, N, 4]`, class probabilities `[1, N]`,
//! class ids `[1, N]` and confidences `[1, N]`.

use crate::detection::{DetectionModel, RawDetections};
use crate::tensor::{NormalizedTensor, TargetSize};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
pub const YOLO_INPUT_SIZE: u32 = 416;
const YOLO_NUM_OUTPUTS: usize = 4;
const BOX_COORDS: usize = 4;

const BOXES_NAMES: [&str; 3] = ["boxes", "bboxes", "bbox"];
const CLASS_PROBS_NAMES: [&str; 3] = ["class_probs", "scores", "probs"];
const CLASS_IDS_NAMES: [&str; 3] = ["class_ids", "classes", "labels"];
const CONFIDENCES_NAMES: [&str; 3] = ["confidences", "confidence", "conf"];

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — export the detector to ONNX and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Output tensor indices: (boxes, class_probs, class_ids, confidences).
type OutputIndices = (usize, usize, usize, usize);

/// ONNX Runtime backed [`DetectionModel`].
pub struct OnnxDetector {
    session: Session,
    input_size: TargetSize,
    /// Discovered by name at load time; falls back to positional ordering.
    output_indices: OutputIndices,
}

impl OnnxDetector {
    /// Load a detector ONNX model that takes `input_size` images.
    pub fn load(model_path: impl AsRef<Path>, input_size: TargetSize) -> Result<Self, DetectorError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            width = input_size.width,
            height = input_size.height,
            "loaded detection model"
        );

        if output_names.len() < YOLO_NUM_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "detection model requires {YOLO_NUM_OUTPUTS} outputs (boxes/class_probs/class_ids/confidences), got {}",
                output_names.len()
            )));
        }

        let output_indices = discover_output_indices(&output_names);
        tracing::debug!(?output_indices, "detector output tensor mapping");

        Ok(Self {
            session,
            input_size,
            output_indices,
        })
    }
}

impl DetectionModel for OnnxDetector {
    type Error = DetectorError;

    fn input_size(&self) -> TargetSize {
        self.input_size
    }

    fn predict(&mut self, tensor: &NormalizedTensor) -> Result<RawDetections, DetectorError> {
        let (boxes_idx, probs_idx, ids_idx, conf_idx) = self.output_indices;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(tensor.view())?])?;

        let (_, boxes) = outputs[boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;
        let (_, class_probs) = outputs[probs_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("class_probs: {e}")))?;
        let (_, confidences) = outputs[conf_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("confidences: {e}")))?;

        // Class ids are exported as int64 by some converters and float by others.
        let class_ids: Vec<i64> = match outputs[ids_idx].try_extract_tensor::<i64>() {
            Ok((_, ids)) => ids.to_vec(),
            Err(_) => {
                let (_, ids) = outputs[ids_idx]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| DetectorError::InferenceFailed(format!("class_ids: {e}")))?;
                ids.iter().map(|&id| id.round() as i64).collect()
            }
        };

        Ok(RawDetections {
            boxes: split_boxes(boxes)?,
            class_probs: class_probs.to_vec(),
            class_ids,
            confidences: confidences.to_vec(),
        })
    }
}

/// Regroup a flat `[.., N, 4]` buffer into one array per box.
fn split_boxes(flat: &[f32]) -> Result<Vec<[f32; 4]>, DetectorError> {
    if flat.len() % BOX_COORDS != 0 {
        return Err(DetectorError::InferenceFailed(format!(
            "boxes tensor has {} values, not a multiple of {BOX_COORDS}",
            flat.len()
        )));
    }
    Ok(flat
        .chunks_exact(BOX_COORDS)
        .map(|c| [c[0], c[1], c[2], c[3]])
        .collect())
}

/// Discover output tensor ordering by name.
///
/// Names are compared case-insensitively with any `:N` suffix removed. If any
/// of the four roles is not found, falls back to positional ordering
/// `[boxes, class_probs, class_ids, confidences]`.
fn discover_output_indices(names: &[String]) -> OutputIndices {
    let normalized: Vec<String> = names
        .iter()
        .map(|n| n.split(':').next().unwrap_or(n).to_ascii_lowercase())
        .collect();
    let find = |aliases: &[&str]| normalized.iter().position(|n| aliases.contains(&n.as_str()));

    match (
        find(&BOXES_NAMES),
        find(&CLASS_PROBS_NAMES),
        find(&CLASS_IDS_NAMES),
        find(&CONFIDENCES_NAMES),
    ) {
        (Some(b), Some(p), Some(i), Some(c)) => {
            tracing::info!("detector: using name-based output tensor mapping");
            (b, p, i, c)
        }
        _ => {
            tracing::info!(
                ?names,
                "detector: output names not recognized, using positional mapping [0]=boxes, [1]=class_probs, [2]=class_ids, [3]=confidences"
            );
            (0, 1, 2, 3)
        }
    }
}
