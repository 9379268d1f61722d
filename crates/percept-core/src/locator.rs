//! Face localization ahead of embedding.

use crate::tensor::Image;
use crate::types::BoundingBox;
use std::convert::Infallible;

/// Finds the face to embed in an image.
pub trait FaceLocator {
    type Error: std::error::Error + Send + Sync + 'static;

    /// The most confident face in `image`, or `None` if there is none.
    fn locate(&mut self, image: &Image) -> Result<Option<BoundingBox>, Self::Error>;
}

impl<L: FaceLocator + ?Sized> FaceLocator for &mut L {
    type Error = L::Error;

    fn locate(&mut self, image: &Image) -> Result<Option<BoundingBox>, Self::Error> {
        (**self).locate(image)
    }
}

/// Placeholder locator type for matchers that embed whole images.
///
/// Uninhabited: a matcher holding `Option<NoLocator>` never has a locator.
#[derive(Debug)]
pub enum NoLocator {}

impl FaceLocator for NoLocator {
    type Error = Infallible;

    fn locate(&mut self, _image: &Image) -> Result<Option<BoundingBox>, Infallible> {
        match *self {}
    }
}
