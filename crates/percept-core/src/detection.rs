//! Confidence-gated post-processing of detection model output.

use crate::pipeline::PipelineError;
use crate::tensor::{NormalizedTensor, TargetSize};
use serde::{Deserialize, Serialize};

/// Detections at or below this confidence are dropped.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// A candidate that passed the confidence gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Box coordinates, encoding defined by the model.
    pub bbox: [f32; 4],
    pub class_id: i64,
    pub confidence: f32,
}

/// Raw model output for a single-image batch: four parallel sequences,
/// one entry per candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetections {
    pub boxes: Vec<[f32; 4]>,
    pub class_probs: Vec<f32>,
    pub class_ids: Vec<i64>,
    pub confidences: Vec<f32>,
}

impl RawDetections {
    /// Number of candidates, after checking all four sequences agree.
    pub fn validated_len(&self) -> Result<usize, PipelineError> {
        let len = self.boxes.len();
        if self.class_probs.len() != len
            || self.class_ids.len() != len
            || self.confidences.len() != len
        {
            return Err(PipelineError::MalformedModelOutput(format!(
                "parallel outputs differ in length: boxes={}, class_probs={}, class_ids={}, confidences={}",
                self.boxes.len(),
                self.class_probs.len(),
                self.class_ids.len(),
                self.confidences.len()
            )));
        }
        Ok(len)
    }
}

/// A detection network.
pub trait DetectionModel {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Spatial size the model's input tensor must have.
    fn input_size(&self) -> TargetSize;

    fn predict(&mut self, tensor: &NormalizedTensor) -> Result<RawDetections, Self::Error>;
}

impl<M: DetectionModel + ?Sized> DetectionModel for &mut M {
    type Error = M::Error;

    fn input_size(&self) -> TargetSize {
        (**self).input_size()
    }

    fn predict(&mut self, tensor: &NormalizedTensor) -> Result<RawDetections, Self::Error> {
        (**self).predict(tensor)
    }
}

/// Validated model output paired with a threshold.
///
/// Filtering happens lazily on iteration. Iterating again starts over and
/// yields the same detections, in the order the model produced them.
#[derive(Debug, Clone)]
pub struct Detections {
    raw: RawDetections,
    threshold: f32,
}

impl Detections {
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Candidate count before filtering.
    pub fn candidates(&self) -> usize {
        self.raw.boxes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Detection> + '_ {
        let threshold = self.threshold;
        self.raw
            .boxes
            .iter()
            .zip(&self.raw.class_ids)
            .zip(&self.raw.confidences)
            .filter(move |(_, confidence)| **confidence > threshold)
            .map(|((&bbox, &class_id), &confidence)| Detection {
                bbox,
                class_id,
                confidence,
            })
    }

    /// Highest-confidence detection, first one wins on ties.
    pub fn best(&self) -> Option<Detection> {
        self.iter().fold(None, |best: Option<Detection>, det| match best {
            Some(b) if b.confidence >= det.confidence => Some(b),
            _ => Some(det),
        })
    }

    pub fn to_vec(&self) -> Vec<Detection> {
        self.iter().collect()
    }

    pub fn into_raw(self) -> RawDetections {
        self.raw
    }
}

/// Check the parallel-length contract and gate candidates on `confidence > threshold`.
pub fn filter_detections(raw: RawDetections, threshold: f32) -> Result<Detections, PipelineError> {
    raw.validated_len()?;
    Ok(Detections { raw, threshold })
}

/// Run `model` on `tensor` and keep the candidates above `threshold`.
pub fn detect_objects<M: DetectionModel + ?Sized>(
    model: &mut M,
    tensor: &NormalizedTensor,
    threshold: f32,
) -> Result<Detections, PipelineError> {
    let raw = model
        .predict(tensor)
        .map_err(|e| PipelineError::Model(Box::new(e)))?;
    let detections = filter_detections(raw, threshold)?;

    tracing::debug!(
        candidates = detections.candidates(),
        kept = detections.iter().count(),
        threshold,
        "filtered detections"
    );

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{preprocess, Image};
    use ndarray::Array3;

    fn raw(confidences: &[f32]) -> RawDetections {
        let n = confidences.len();
        RawDetections {
            boxes: (0..n).map(|i| [i as f32, 0.0, i as f32 + 1.0, 1.0]).collect(),
            class_probs: vec![0.8; n],
            class_ids: (0..n as i64).collect(),
            confidences: confidences.to_vec(),
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("model offline")]
    struct Offline;

    struct FixedModel {
        output: Result<RawDetections, ()>,
        calls: usize,
    }

    impl DetectionModel for FixedModel {
        type Error = Offline;

        fn input_size(&self) -> TargetSize {
            TargetSize::square(8)
        }

        fn predict(&mut self, tensor: &NormalizedTensor) -> Result<RawDetections, Offline> {
            assert_eq!(tensor.shape(), &[1, 8, 8, 3]);
            self.calls += 1;
            self.output.clone().map_err(|_| Offline)
        }
    }

    fn tensor() -> NormalizedTensor {
        let image = Image::from_array(Array3::from_elem((8, 8, 3), 90u8));
        preprocess(&image, TargetSize::square(8)).unwrap()
    }

    #[test]
    fn test_filter_keeps_only_confident() {
        let raw = RawDetections {
            boxes: vec![[1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0]],
            class_probs: vec![0.7, 0.6],
            class_ids: vec![3, 9],
            confidences: vec![0.9, 0.3],
        };
        let dets = filter_detections(raw, 0.5).unwrap().to_vec();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(dets[0].class_id, 3);
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_filter_threshold_is_strict() {
        let dets = filter_detections(raw(&[0.5, 0.50001]), 0.5).unwrap();
        assert_eq!(dets.to_vec().len(), 1);
        assert_eq!(dets.to_vec()[0].class_id, 1);
    }

    #[test]
    fn test_filter_preserves_model_order() {
        let dets = filter_detections(raw(&[0.6, 0.2, 0.95, 0.7]), 0.5).unwrap();
        let ids: Vec<i64> = dets.iter().map(|d| d.class_id).collect();
        assert_eq!(ids, vec![0, 2, 3]);
    }

    #[test]
    fn test_filter_monotonic_in_threshold() {
        let confidences = [0.05, 0.51, 0.33, 0.99, 0.75, 0.5, 0.62];
        let mut previous: Option<Vec<Detection>> = None;
        for t in [0.0, 0.3, 0.5, 0.6, 0.8, 1.0] {
            let current = filter_detections(raw(&confidences), t).unwrap().to_vec();
            assert!(current.iter().all(|d| d.confidence > t));
            if let Some(lower) = &previous {
                assert!(current.iter().all(|d| lower.contains(d)));
            }
            previous = Some(current);
        }
    }

    #[test]
    fn test_filter_is_restartable() {
        let dets = filter_detections(raw(&[0.9, 0.1, 0.8]), 0.5).unwrap();
        let first: Vec<Detection> = dets.iter().collect();
        let second: Vec<Detection> = dets.iter().collect();
        assert_eq!(first, second);
        assert_eq!(dets.candidates(), 3);
    }

    #[test]
    fn test_filter_rejects_mismatched_lengths() {
        let mut bad = raw(&[0.9, 0.8]);
        bad.confidences.push(0.7);
        let err = filter_detections(bad, 0.5).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedModelOutput(_)));

        let mut bad = raw(&[0.9, 0.8]);
        bad.class_probs.pop();
        assert!(filter_detections(bad, 0.5).is_err());
    }

    #[test]
    fn test_filter_empty_output() {
        let dets = filter_detections(RawDetections::default(), 0.5).unwrap();
        assert_eq!(dets.iter().count(), 0);
        assert!(dets.best().is_none());
    }

    #[test]
    fn test_best_picks_highest_confidence() {
        let dets = filter_detections(raw(&[0.7, 0.9, 0.9, 0.6]), 0.5).unwrap();
        assert_eq!(dets.best().map(|d| d.class_id), Some(1));
    }

    #[test]
    fn test_detect_objects_calls_model_once() {
        let mut model = FixedModel { output: Ok(raw(&[0.9, 0.3])), calls: 0 };
        let dets = detect_objects(&mut model, &tensor(), DEFAULT_CONFIDENCE_THRESHOLD).unwrap();
        assert_eq!(model.calls, 1);
        assert_eq!(dets.to_vec().len(), 1);
    }

    #[test]
    fn test_detect_objects_wraps_model_error() {
        let mut model = FixedModel { output: Err(()), calls: 0 };
        let err = detect_objects(&mut model, &tensor(), 0.5).unwrap_err();
        assert!(matches!(err, PipelineError::Model(_)));
        assert!(err.to_string().contains("model offline"));
    }
}
