//! Image preparation for the road segmentation network.
//!
//! The network downsamples five times, so both spatial dimensions of its input
//! must be divisible by 32. Large photographs are first scaled down so that
//! neither side exceeds the configured maximum.

use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;

use crate::errors::{AerialRoadsError, Result};

pub const DEFAULT_MAX_IMAGE_SIZE: u32 = 1500;
pub const SIZE_MULTIPLE: u32 = 32;

/// Memory layout of the model's image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `(batch, height, width, channels)`, the layout of Keras exports.
    Nhwc,
    /// `(batch, channels, height, width)`.
    Nchw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentationOptions {
    pub max_image_size: u32,
}

impl Default for SegmentationOptions {
    fn default() -> Self {
        Self {
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
        }
    }
}

/// Dimensions after the aspect-preserving downscale.
///
/// The scale factor is the larger of `width / max` and `height / max`; images
/// already within bounds are left alone.
pub fn scaled_dimensions(width: u32, height: u32, max_image_size: u32) -> (u32, u32) {
    let max = f64::from(max_image_size.max(1));
    let scale = (f64::from(width) / max).max(f64::from(height) / max);
    if scale > 1.0 {
        (
            (f64::from(width) / scale).floor() as u32,
            (f64::from(height) / scale).floor() as u32,
        )
    } else {
        (width, height)
    }
}

/// Final network input dimensions: downscaled, then rounded down to a multiple of 32.
pub fn target_dimensions(width: u32, height: u32, max_image_size: u32) -> Result<(u32, u32)> {
    let (scaled_width, scaled_height) = scaled_dimensions(width, height, max_image_size);
    let aligned = (
        scaled_width / SIZE_MULTIPLE * SIZE_MULTIPLE,
        scaled_height / SIZE_MULTIPLE * SIZE_MULTIPLE,
    );
    if aligned.0 == 0 || aligned.1 == 0 {
        return Err(AerialRoadsError::Validation {
            field: "image".to_string(),
            reason: format!(
                "is too small: {width}x{height} becomes {scaled_width}x{scaled_height}, \
                 both sides must be at least {SIZE_MULTIPLE} pixels"
            ),
        });
    }
    Ok(aligned)
}

/// Resizes the image to the network input size.
pub fn fit_to_network(image: &RgbImage, max_image_size: u32) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    let (target_width, target_height) = target_dimensions(width, height, max_image_size)?;

    let (scaled_width, scaled_height) = scaled_dimensions(width, height, max_image_size);
    let scaled = if (scaled_width, scaled_height) != (width, height) {
        imageops::resize(image, scaled_width, scaled_height, FilterType::Lanczos3)
    } else {
        image.clone()
    };

    if (target_width, target_height) == scaled.dimensions() {
        Ok(scaled)
    } else {
        Ok(imageops::resize(
            &scaled,
            target_width,
            target_height,
            FilterType::Triangle,
        ))
    }
}

/// Builds the normalized batch-of-one input tensor.
pub fn preprocess(
    image: &RgbImage,
    options: &SegmentationOptions,
    layout: TensorLayout,
) -> Result<Array4<f32>> {
    let image = fit_to_network(image, options.max_image_size)?;

    // (チャンネル, 高さ, 幅)
    let chw = image.as_ndarray3();
    let arranged = match layout {
        TensorLayout::Nchw => chw,
        TensorLayout::Nhwc => chw.permuted_axes([1, 2, 0]),
    };

    let tensor = arranged
        .mapv(|v| f32::from(v) / 255.0)
        .insert_axis(Axis(0));
    Ok(tensor.as_standard_layout().into_owned())
}

/// Spatial `(height, width)` of a preprocessed tensor.
pub fn spatial_shape(tensor: &ArrayView4<f32>, layout: TensorLayout) -> (usize, usize) {
    let shape = tensor.shape();
    match layout {
        TensorLayout::Nhwc => (shape[1], shape[2]),
        TensorLayout::Nchw => (shape[2], shape[3]),
    }
}
