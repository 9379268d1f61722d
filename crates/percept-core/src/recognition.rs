//! First-match policy over a recognition model's ranked result table.

use crate::pipeline::PipelineError;
use crate::tensor::Image;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One candidate reference image and its distance to the input image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRow {
    pub identity: PathBuf,
    /// Lower is closer. The metric is the model's own.
    pub distance: f32,
}

/// Candidate rows ranked best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchTable {
    pub rows: Vec<MatchRow>,
}

impl MatchTable {
    pub fn new(rows: Vec<MatchRow>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn first(&self) -> Option<&MatchRow> {
        self.rows.first()
    }
}

/// The retained match: the top-ranked row, labelled by its file stem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionMatch {
    pub identity_label: String,
    pub identity: PathBuf,
    pub distance: f32,
}

/// A face recognition capability that ranks the images in a reference
/// directory against an input image.
///
/// `Ok(None)` means the model produced no table at all.
pub trait RecognitionModel {
    type Error: std::error::Error + Send + Sync + 'static;

    fn find(&mut self, image: &Image, reference_dir: &Path)
        -> Result<Option<MatchTable>, Self::Error>;
}

impl<M: RecognitionModel + ?Sized> RecognitionModel for &mut M {
    type Error = M::Error;

    fn find(
        &mut self,
        image: &Image,
        reference_dir: &Path,
    ) -> Result<Option<MatchTable>, Self::Error> {
        (**self).find(image, reference_dir)
    }
}

/// Strip directory components and the extension from a stored reference path.
///
/// Both `/` and `\` separate components, so paths recorded on Windows label
/// the same way as native ones.
pub fn identity_label(path: &Path) -> Option<String> {
    let name = path.to_str().map_or_else(
        || path.file_name().map(|n| n.to_string_lossy().into_owned()),
        |s| s.rsplit(|c: char| c == '/' || c == '\\').next().map(str::to_owned),
    )?;
    let stem = Path::new(&name).file_stem()?.to_string_lossy().into_owned();
    if stem.is_empty() {
        None
    } else {
        Some(stem)
    }
}

/// Turn the top row of `table` into a [`RecognitionMatch`].
pub fn first_match(table: Option<MatchTable>) -> Result<Option<RecognitionMatch>, PipelineError> {
    let Some(row) = table.and_then(|t| t.rows.into_iter().next()) else {
        return Ok(None);
    };

    let identity_label = identity_label(&row.identity).ok_or_else(|| {
        PipelineError::MalformedModelOutput(format!(
            "match identity {:?} has no file name",
            row.identity
        ))
    })?;

    Ok(Some(RecognitionMatch {
        identity_label,
        identity: row.identity,
        distance: row.distance,
    }))
}

/// Ask `model` for matches against `reference_dir` and keep the best one.
pub fn recognize_face<M: RecognitionModel + ?Sized>(
    model: &mut M,
    image: &Image,
    reference_dir: &Path,
) -> Result<Option<RecognitionMatch>, PipelineError> {
    let table = model
        .find(image, reference_dir)
        .map_err(|e| PipelineError::Model(Box::new(e)))?;

    tracing::debug!(
        reference_dir = %reference_dir.display(),
        rows = table.as_ref().map_or(0, MatchTable::len),
        "recognition table"
    );

    first_match(table)
}

/// For callers that treat an empty result as a failure.
pub fn require_match(found: Option<RecognitionMatch>) -> Result<RecognitionMatch, PipelineError> {
    found.ok_or(PipelineError::NoMatchFound)
}
