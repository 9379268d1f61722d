//! Facenet512 face embedder via ONNX Runtime.
//!
//! Takes a 160x160 NHWC face image scaled to [0, 1] and produces a
//! 512-dimensional, L2-normalized embedding.

use crate::gallery::Embedder;
use crate::tensor::{NormalizedTensor, TargetSize};
use crate::types::Embedding;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
pub const FACENET_INPUT_SIZE: u32 = 160;
const FACENET_EMBEDDING_DIM: usize = 512;
const FACENET_MODEL_VERSION: &str = "facenet512";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — export Facenet512 to ONNX and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ONNX Runtime backed [`Embedder`].
pub struct OnnxEmbedder {
    session: Session,
}

impl OnnxEmbedder {
    /// Load the Facenet512 ONNX model from the given path.
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, EmbedderError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded Facenet512 model"
        );

        Ok(Self { session })
    }
}

impl Embedder for OnnxEmbedder {
    type Error = EmbedderError;

    fn input_size(&self) -> TargetSize {
        TargetSize::square(FACENET_INPUT_SIZE)
    }

    fn embed(&mut self, tensor: &NormalizedTensor) -> Result<Embedding, EmbedderError> {
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(tensor.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        to_embedding(raw_data.to_vec())
    }
}

/// Check the dimension and L2-normalize a raw model output.
fn to_embedding(raw: Vec<f32>) -> Result<Embedding, EmbedderError> {
    if raw.len() != FACENET_EMBEDDING_DIM {
        return Err(EmbedderError::InferenceFailed(format!(
            "expected {FACENET_EMBEDDING_DIM}-dim embedding, got {}",
            raw.len()
        )));
    }

    let embedding = Embedding {
        values: raw,
        model_version: Some(FACENET_MODEL_VERSION.to_string()),
    };
    Ok(embedding.l2_normalized())
}
