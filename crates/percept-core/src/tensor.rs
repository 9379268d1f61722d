//! Raw images and the normalized tensors fed to models.
//!
//! An [`Image`] is an HWC array of `u8` intensities in RGB order. It is only
//! checked when it is turned into a [`NormalizedTensor`] by [`preprocess`],
//! which resizes it to the model's input size, rescales to [0, 1] and adds a
//! batch dimension of one.

use crate::pipeline::PipelineError;
use crate::types::BoundingBox;
use ::image::imageops::{self, FilterType};
use ::image::RgbImage;
use ndarray::{s, Array3, Array4, ArrayView4};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;
const PIXEL_MAX: f32 = 255.0;

#[derive(Error, Debug)]
pub enum ImageLoadError {
    #[error("image file not found: {0}")]
    NotFound(String),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: ::image::ImageError,
    },
}

/// Spatial input size a model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn square(side: u32) -> Self {
        Self::new(side, side)
    }
}

/// A raw image: height × width × channel, `u8` values, RGB order.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pixels: Array3<u8>,
}

impl Image {
    /// Wrap an HWC array. The channel count is not checked here.
    pub fn from_array(pixels: Array3<u8>) -> Self {
        Self { pixels }
    }

    /// Load an image file and convert it to RGB.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ImageLoadError::NotFound(path.display().to_string()));
        }
        let decoded = ::image::open(path).map_err(|source| ImageLoadError::Decode {
            path: path.display().to_string(),
            source,
        })?;
        let rgb = decoded.to_rgb8();
        tracing::debug!(
            path = %path.display(),
            width = rgb.width(),
            height = rgb.height(),
            "loaded image"
        );
        Ok(Self::from(rgb))
    }

    pub fn height(&self) -> usize {
        self.pixels.shape()[0]
    }

    pub fn width(&self) -> usize {
        self.pixels.shape()[1]
    }

    pub fn channels(&self) -> usize {
        self.pixels.shape()[2]
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    /// Copy of the pixels inside `region`, clamped to the image bounds.
    ///
    /// `None` when nothing of the region lies inside the image.
    pub fn crop(&self, region: &BoundingBox) -> Option<Image> {
        let left = region.x.max(0.0).floor() as usize;
        let top = region.y.max(0.0).floor() as usize;
        let right = ((region.x + region.width).ceil().max(0.0) as usize).min(self.width());
        let bottom = ((region.y + region.height).ceil().max(0.0) as usize).min(self.height());
        if right <= left || bottom <= top {
            return None;
        }
        Some(Self::from_array(
            self.pixels.slice(s![top..bottom, left..right, ..]).to_owned(),
        ))
    }

    pub(crate) fn to_rgb_image(&self) -> Result<RgbImage, PipelineError> {
        let (height, width, channels) = self.pixels.dim();
        if channels != RGB_CHANNELS {
            return Err(PipelineError::InvalidImage(format!(
                "expected {RGB_CHANNELS} channels, got {channels}"
            )));
        }
        if height == 0 || width == 0 {
            return Err(PipelineError::InvalidImage(format!(
                "image is empty ({width}x{height})"
            )));
        }

        let raw: Vec<u8> = self.pixels.iter().copied().collect();
        RgbImage::from_raw(width as u32, height as u32, raw).ok_or_else(|| {
            PipelineError::InvalidImage(format!("pixel buffer does not fill {width}x{height}"))
        })
    }
}

impl From<RgbImage> for Image {
    fn from(rgb: RgbImage) -> Self {
        let (width, height) = rgb.dimensions();
        let pixels = Array3::from_shape_vec(
            (height as usize, width as usize, RGB_CHANNELS),
            rgb.into_raw(),
        )
        .unwrap_or_else(|_| Array3::zeros((0, 0, RGB_CHANNELS)));
        Self { pixels }
    }
}

/// Model input: `(1, height, width, 3)` floats in [0, 1].
///
/// Only [`preprocess`] builds one, so the shape always matches the
/// [`TargetSize`] it was built for.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor {
    data: Array4<f32>,
}

impl NormalizedTensor {
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn size(&self) -> TargetSize {
        let shape = self.data.shape();
        TargetSize::new(shape[2] as u32, shape[1] as u32)
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    pub fn into_inner(self) -> Array4<f32> {
        self.data
    }
}

/// Resize `image` to `target`, scale every value by 1/255 and add a batch axis.
///
/// Resampling uses a triangle (bilinear) filter. The output is a pure
/// function of its inputs.
pub fn preprocess(image: &Image, target: TargetSize) -> Result<NormalizedTensor, PipelineError> {
    if target.width == 0 || target.height == 0 {
        return Err(PipelineError::InvalidTargetSize {
            width: target.width,
            height: target.height,
        });
    }

    let rgb = image.to_rgb_image()?;
    let resized = if rgb.dimensions() == (target.width, target.height) {
        rgb
    } else {
        imageops::resize(&rgb, target.width, target.height, FilterType::Triangle)
    };

    let (w, h) = (target.width as usize, target.height as usize);
    let mut data = Array4::<f32>::zeros((1, h, w, RGB_CHANNELS));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..RGB_CHANNELS {
            data[[0, y as usize, x as usize, c]] = pixel.0[c] as f32 / PIXEL_MAX;
        }
    }

    tracing::debug!(
        from_width = image.width(),
        from_height = image.height(),
        to_width = w,
        to_height = h,
        "preprocessed image"
    );

    Ok(NormalizedTensor { data })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: usize, height: usize) -> Image {
        let pixels = Array3::from_shape_fn((height, width, 3), |(y, x, c)| {
            ((x * 7 + y * 13 + c * 85) % 256) as u8
        });
        Image::from_array(pixels)
    }

    fn region(x: f32, y: f32, width: f32, height: f32) -> BoundingBox {
        BoundingBox { x, y, width, height, confidence: 1.0, landmarks: None }
    }

    #[test]
    fn test_crop_inside() {
        let image = gradient(20, 10);
        let face = image.crop(&region(4.0, 2.0, 6.0, 5.0)).unwrap();
        assert_eq!((face.width(), face.height(), face.channels()), (6, 5, 3));
        assert_eq!(face.pixels()[[0, 0, 1]], image.pixels()[[2, 4, 1]]);
        assert_eq!(face.pixels()[[4, 5, 2]], image.pixels()[[6, 9, 2]]);
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let image = gradient(20, 10);
        let face = image.crop(&region(-3.5, 7.2, 10.0, 8.0)).unwrap();
        assert_eq!((face.width(), face.height()), (7, 3));
        assert_eq!(face.pixels()[[0, 0, 0]], image.pixels()[[7, 0, 0]]);
    }

    #[test]
    fn test_crop_outside_is_none() {
        let image = gradient(20, 10);
        assert!(image.crop(&region(25.0, 0.0, 5.0, 5.0)).is_none());
        assert!(image.crop(&region(-8.0, -8.0, 4.0, 4.0)).is_none());
        assert!(image.crop(&region(3.0, 3.0, 0.0, 4.0)).is_none());
    }

    #[test]
    fn test_preprocess_output_shape() {
        let tensor = preprocess(&gradient(64, 48), TargetSize::new(32, 20)).unwrap();
        assert_eq!(tensor.shape(), &[1, 20, 32, 3]);
        assert_eq!(tensor.size(), TargetSize::new(32, 20));
    }

    #[test]
    fn test_preprocess_values_in_unit_range() {
        let tensor = preprocess(&gradient(50, 30), TargetSize::square(41)).unwrap();
        assert!(tensor.view().iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_preprocess_extremes() {
        let white = Image::from_array(Array3::from_elem((4, 4, 3), 255u8));
        let black = Image::from_array(Array3::zeros((4, 4, 3)));
        let target = TargetSize::square(4);
        assert!(preprocess(&white, target).unwrap().view().iter().all(|&v| v == 1.0));
        assert!(preprocess(&black, target).unwrap().view().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_preprocess_uniform_upscale_stays_uniform() {
        let image = Image::from_array(Array3::from_elem((10, 10, 3), 128u8));
        let tensor = preprocess(&image, TargetSize::square(25)).unwrap();
        let expected = 128.0 / 255.0;
        assert!(tensor
            .view()
            .iter()
            .all(|&v| (v - expected).abs() <= 1.0 / 255.0 + 1e-6));
    }

    #[test]
    fn test_preprocess_same_size_preserves_pixels() {
        let image = gradient(8, 6);
        let tensor = preprocess(&image, TargetSize::new(8, 6)).unwrap();
        let expected = image.pixels()[[3, 5, 1]] as f32 / 255.0;
        assert_eq!(tensor.view()[[0, 3, 5, 1]], expected);
    }

    #[test]
    fn test_preprocess_idempotent() {
        let image = gradient(37, 23);
        let target = TargetSize::new(16, 16);
        assert_eq!(preprocess(&image, target).unwrap(), preprocess(&image, target).unwrap());
    }

    #[test]
    fn test_preprocess_rejects_wrong_channels() {
        let gray = Image::from_array(Array3::zeros((8, 8, 1)));
        let rgba = Image::from_array(Array3::zeros((8, 8, 4)));
        for image in [gray, rgba] {
            let err = preprocess(&image, TargetSize::square(4)).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidImage(_)), "got {err:?}");
        }
    }

    #[test]
    fn test_preprocess_rejects_empty_image() {
        let empty = Image::from_array(Array3::zeros((0, 5, 3)));
        let err = preprocess(&empty, TargetSize::square(4)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidImage(_)));
    }

    #[test]
    fn test_preprocess_rejects_zero_target() {
        let err = preprocess(&gradient(4, 4), TargetSize::new(0, 4)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTargetSize { width: 0, height: 4 }
        ));
    }

    #[test]
    fn test_from_rgb_image_is_hwc() {
        let mut rgb = RgbImage::new(3, 2);
        rgb.put_pixel(2, 1, ::image::Rgb([10, 20, 30]));
        let image = Image::from(rgb);
        assert_eq!((image.height(), image.width(), image.channels()), (2, 3, 3));
        assert_eq!(image.pixels()[[1, 2, 2]], 30);
    }

    #[test]
    fn test_open_missing_file() {
        let err = Image::open("/nonexistent/percept/missing.jpg").unwrap_err();
        assert!(matches!(err, ImageLoadError::NotFound(_)));
    }
}
