//! Directory-backed face matching.
//!
//! [`DirectoryMatcher`] embeds an input image and every reference image under a
//! directory with the same [`Embedder`], then ranks the references that fall
//! within a distance threshold. With a [`FaceLocator`] attached, each image is
//! cropped to its most confident face before embedding and images without a
//! face take no part in matching. Reference embeddings are kept in memory for
//! the matcher's lifetime; nothing is written back to the directory.

use crate::locator::{FaceLocator, NoLocator};
use crate::pipeline::PipelineError;
use crate::recognition::{MatchRow, MatchTable, RecognitionModel};
use crate::tensor::{preprocess, Image, NormalizedTensor, TargetSize};
use crate::types::{DistanceMetric, Embedding};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const REFERENCE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("reference directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("preprocess: {0}")]
    Preprocess(#[from] PipelineError),
    #[error("embedder: {0}")]
    Embedder(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("face locator: {0}")]
    Locator(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A face embedding network.
pub trait Embedder {
    type Error: std::error::Error + Send + Sync + 'static;

    fn input_size(&self) -> TargetSize;

    fn embed(&mut self, tensor: &NormalizedTensor) -> Result<Embedding, Self::Error>;
}

/// Ranks the reference images of a directory against an input image.
pub struct DirectoryMatcher<E, L = NoLocator> {
    embedder: E,
    locator: Option<L>,
    metric: DistanceMetric,
    threshold: f32,
    /// `None` marks a reference in which no face was found.
    cache: HashMap<PathBuf, Option<Embedding>>,
}

impl<E: Embedder> DirectoryMatcher<E> {
    /// Matcher using `metric` and its default threshold. Whole images are
    /// embedded until a locator is attached.
    pub fn new(embedder: E, metric: DistanceMetric) -> Self {
        Self {
            embedder,
            locator: None,
            metric,
            threshold: metric.default_threshold(),
            cache: HashMap::new(),
        }
    }
}

impl<E: Embedder, L: FaceLocator> DirectoryMatcher<E, L> {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Crop every image to its located face before embedding.
    pub fn with_locator<N: FaceLocator>(self, locator: N) -> DirectoryMatcher<E, N> {
        self.with_optional_locator(Some(locator))
    }

    /// Like [`with_locator`](Self::with_locator); `None` embeds whole images.
    /// Cached reference embeddings are dropped.
    pub fn with_optional_locator<N: FaceLocator>(self, locator: Option<N>) -> DirectoryMatcher<E, N> {
        DirectoryMatcher {
            embedder: self.embedder,
            locator,
            metric: self.metric,
            threshold: self.threshold,
            cache: HashMap::new(),
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn has_locator(&self) -> bool {
        self.locator.is_some()
    }

    /// Number of reference images processed and held in memory.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Embedding of the face in `image`, or `None` if the locator finds none.
    fn embed_face(&mut self, image: &Image) -> Result<Option<Embedding>, GalleryError> {
        let face = match self.locator.as_mut() {
            None => Cow::Borrowed(image),
            Some(locator) => {
                let region = locator
                    .locate(image)
                    .map_err(|e| GalleryError::Locator(Box::new(e)))?;
                match region.and_then(|region| image.crop(&region)) {
                    Some(face) => Cow::Owned(face),
                    None => return Ok(None),
                }
            }
        };

        let input = preprocess(&face, self.embedder.input_size())?;
        self.embedder
            .embed(&input)
            .map(Some)
            .map_err(|e| GalleryError::Embedder(Box::new(e)))
    }

    /// Embedding for a reference file, or `None` if it cannot be decoded or
    /// holds no face.
    fn reference_embedding(&mut self, path: &Path) -> Result<Option<Embedding>, GalleryError> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached.clone());
        }

        let image = match Image::open(path) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable reference image");
                return Ok(None);
            }
        };

        let embedding = self.embed_face(&image)?;
        if embedding.is_none() {
            tracing::warn!(path = %path.display(), "no face found, skipping reference image");
        }
        self.cache.insert(path.to_path_buf(), embedding.clone());
        Ok(embedding)
    }

    /// Rank every reference under `reference_dir` against `image`.
    ///
    /// `Ok(None)` when the directory holds no reference images. An empty
    /// table when no face is found in `image`.
    pub fn rank(
        &mut self,
        image: &Image,
        reference_dir: &Path,
    ) -> Result<Option<MatchTable>, GalleryError> {
        if !reference_dir.is_dir() {
            return Err(GalleryError::DirectoryNotFound(
                reference_dir.display().to_string(),
            ));
        }

        let references = list_reference_images(reference_dir)?;
        if references.is_empty() {
            tracing::info!(dir = %reference_dir.display(), "no reference images");
            return Ok(None);
        }

        let Some(query) = self.embed_face(image)? else {
            tracing::info!("no face found in input image");
            return Ok(Some(MatchTable::default()));
        };

        let mut rows = Vec::new();
        for path in references {
            let Some(reference) = self.reference_embedding(&path)? else {
                continue;
            };
            let distance = self.metric.distance(&query, &reference);
            tracing::trace!(path = %path.display(), distance, "compared reference");
            if distance <= self.threshold {
                rows.push(MatchRow { identity: path, distance });
            }
        }

        rows.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(
            metric = %self.metric,
            threshold = self.threshold,
            matches = rows.len(),
            "ranked references"
        );

        Ok(Some(MatchTable::new(rows)))
    }
}

impl<E: Embedder, L: FaceLocator> RecognitionModel for DirectoryMatcher<E, L> {
    type Error = GalleryError;

    fn find(
        &mut self,
        image: &Image,
        reference_dir: &Path,
    ) -> Result<Option<MatchTable>, GalleryError> {
        self.rank(image, reference_dir)
    }
}

fn is_reference_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            REFERENCE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// All image files below `dir`, recursively, sorted by path.
///
/// Fails only if `dir` itself cannot be read; unreadable subdirectories are
/// logged and skipped.
pub fn list_reference_images(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    walk_references(dir, |current| {
        Ok(std::fs::read_dir(current)?
            .flatten()
            .map(|entry| entry.path())
            .collect())
    })
}

fn walk_references<F>(dir: &Path, mut read_dir: F) -> Result<Vec<PathBuf>, std::io::Error>
where
    F: FnMut(&Path) -> Result<Vec<PathBuf>, std::io::Error>,
{
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = match read_dir(&current) {
            Ok(entries) => entries,
            Err(e) if current == dir => return Err(e),
            Err(e) => {
                tracing::warn!(dir = %current.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };
        for path in entries {
            if path.is_dir() {
                pending.push(path);
            } else if is_reference_image(&path) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}
